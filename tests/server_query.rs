use h1_exchange::handler_fn;
use http::StatusCode;

mod common;

use common::{serve, split_head};

/// Serves `GET <target>` and answers with every query parameter and its values.
fn query_of(target: &str) -> String {
    let factory = || {
        handler_fn(|http| {
            let params: Vec<String> = http
                .query_param_names()
                .iter()
                .map(|n| format!("{}={:?}", n, http.query_param_all(n)))
                .collect();
            http.status(StatusCode::OK);
            http.body(params.join(" "));
            Ok(())
        })
    };

    let input = format!("GET {} HTTP/1.1\r\n\r\n", target);
    let (stream, res) = serve(input.as_bytes(), 1024, factory);
    res.unwrap();

    let out = stream.output();
    let (_, body) = split_head(&out);
    String::from_utf8(body.to_vec()).unwrap()
}

#[test]
fn no_query() {
    assert_eq!(query_of("/"), "");
    assert_eq!(query_of("/?"), "");
}

#[test]
fn single_param() {
    assert_eq!(query_of("/?key=value"), r#"key=["value"]"#);
}

#[test]
fn empty_key_or_value() {
    assert_eq!(query_of("/?=value"), r#"=["value"]"#);
    assert_eq!(query_of("/?key="), r#"key=[""]"#);
    assert_eq!(query_of("/?key"), r#"key=[""]"#);
}

#[test]
fn several_params() {
    assert_eq!(query_of("/?a=1&b=2"), r#"a=["1"] b=["2"]"#);
    assert_eq!(query_of("/?a=1&&b=2&"), r#"a=["1"] b=["2"]"#);
}

#[test]
fn repeated_key_keeps_order() {
    assert_eq!(query_of("/?a=1&b&a=2"), r#"a=["1", "2"] b=[""]"#);
}

#[test]
fn params_are_decoded() {
    assert_eq!(query_of("/?k%7D=value"), r#"k}=["value"]"#);
    assert_eq!(query_of("/?%C2%BF=%C3%80"), r#"¿=["À"]"#);
    assert_eq!(query_of("/?a+b=c+d%2B"), r#"a b=["c d+"]"#);
}

#[test]
fn first_value_and_missing_param() {
    let factory = || {
        handler_fn(|http| {
            let out = format!(
                "{:?} {:?} {:?}",
                http.query_param("a"),
                http.query_param("b"),
                http.query_param("c"),
            );
            http.status(StatusCode::OK);
            http.body(out);
            Ok(())
        })
    };

    let (stream, res) = serve(b"GET /x?a=1&a=2&b HTTP/1.1\r\n\r\n", 1024, factory);
    res.unwrap();

    let out = stream.output();
    let (_, body) = split_head(&out);
    assert_eq!(body, &br#"Some("1") Some("") None"#[..]);
}

#[test]
fn path_is_decoded_raw_path_is_not() {
    let factory = || {
        handler_fn(|http| {
            let out = format!("{}|{}|{:?}", http.path(), http.raw_path(), http.segments().get(0));
            http.status(StatusCode::OK);
            http.body(out);
            Ok(())
        })
    };

    let (stream, res) = serve(b"GET /a%20b/c?q HTTP/1.1\r\n\r\n", 1024, factory);
    res.unwrap();

    let out = stream.output();
    let (_, body) = split_head(&out);
    assert_eq!(body, &br#"/a b/c|/a%20b/c|Some("a b")"#[..]);
}
