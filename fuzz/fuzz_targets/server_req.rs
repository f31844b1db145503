#![no_main]
use libfuzzer_sys::fuzz_target;

use h1_exchange::server::{self, Transport};
use h1_exchange::{handler_fn, Header, Options};
use http::StatusCode;
use std::io::{self, Cursor, Read, Write};

/// Reads the fuzz input, discards everything written.
struct FuzzIo(Cursor<Vec<u8>>);

impl Read for FuzzIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for FuzzIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for FuzzIo {}

fuzz_target!(|data: &[u8]| {
    let io = FuzzIo(Cursor::new(data.to_vec()));

    let factory = || {
        handler_fn(|http| {
            // touch everything the request exposes
            let _ = (http.method(), http.path(), http.raw_query(), http.segments().len());
            let _ = (http.query_param("a"), http.query_param_names());
            let _ = http.request_header(Header::Host);
            let len = http.request_body().map(|b| b.len()).unwrap_or(0);

            http.status(StatusCode::OK);
            http.body(format!("{}", len));
            Ok(())
        })
    };

    let conn = server::handshake(io, factory, Options::new().buffer_size(256));
    conn.serve().ok();
});
