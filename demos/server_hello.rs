use async_std::net::{TcpListener, TcpStream};
use h1_exchange::server;
use h1_exchange::{handler_fn, Error, Options};
use http::StatusCode;

#[async_std::main]
async fn main() -> Result<(), Error> {
    let l = TcpListener::bind("127.0.0.1:3000").await?;

    println!("Listening to {:?}", l.local_addr()?);
    listen(&l).await;

    Ok(())
}

async fn listen(l: &TcpListener) {
    loop {
        let (tcp, _) = l.accept().await.expect("Accept incoming");

        let task = async move {
            if let Err(e) = handle_conn(tcp).await {
                println!("Connection failed: {}", e);
            }
        };

        async_std::task::spawn(task);
    }
}

async fn handle_conn(tcp: TcpStream) -> Result<(), Error> {
    let factory = || {
        handler_fn(|http| {
            http.status(StatusCode::OK);
            http.header("content-type", "text/plain")?;
            http.body("Hello world!\n");
            Ok(())
        })
    };

    server::handshake_async(tcp, factory, Options::default())
        .serve()
        .await
}
