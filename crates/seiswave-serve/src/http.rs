//! Minimal HTTP surface sharing the wave-server port
//!
//! Only `GET`/`HEAD /status[?sort=<spec>]` is served; every other path is a
//! 404. Connections stay open after a reply.

use winnow::ascii::space1;
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{one_of, take_till};

use crate::stats::{ConnectionRegistry, SortSpec};

type PResult<T> = winnow::ModalResult<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
}

impl HttpRequest {
    /// Value of a `key=value` query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Recognize `GET|HEAD <target> HTTP/1.x`. Anything else is not HTTP.
pub fn parse_request_line(line: &str) -> Option<HttpRequest> {
    let mut input = line.trim_end_matches(['\r', '\n']);
    request_line.parse_next(&mut input).ok()
}

fn request_line(input: &mut &str) -> PResult<HttpRequest> {
    let method = alt(("GET".value(Method::Get), "HEAD".value(Method::Head))).parse_next(input)?;
    space1.parse_next(input)?;
    let path = take_till(1.., |c: char| c == '?' || c.is_ascii_whitespace()).parse_next(input)?;
    let query = opt(preceded('?', take_till(0.., |c: char| c.is_ascii_whitespace())))
        .parse_next(input)?;
    space1.parse_next(input)?;
    terminated(("HTTP/1.", one_of(['0', '1'])), eof).parse_next(input)?;
    Ok(HttpRequest {
        method,
        path: path.to_string(),
        query: query.map(str::to_string),
    })
}

/// Full response bytes for `request`.
pub fn respond(request: &HttpRequest, registry: &ConnectionRegistry) -> Vec<u8> {
    match request.path.as_str() {
        "/status" => {
            let sort = SortSpec::parse(request.param("sort").unwrap_or(""));
            build(request.method, "200 OK", &registry.report(sort))
        }
        _ => build(request.method, "404 Not Found", "Not Found\n"),
    }
}

fn build(method: Method, status: &str, body: &str) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    if method == Method::Get {
        out.extend_from_slice(body.as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_lines() {
        let req = parse_request_line("GET /status?sort=R- HTTP/1.1\r\n").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/status");
        assert_eq!(req.param("sort"), Some("R-"));

        let head = parse_request_line("HEAD /x HTTP/1.0").unwrap();
        assert_eq!((head.method, head.query), (Method::Head, None));

        assert!(parse_request_line("GETSCNLRAW 1 S C N L 1 2").is_none());
        assert!(parse_request_line("GET /status").is_none());
        assert!(parse_request_line("POST /status HTTP/1.1").is_none());
    }

    #[test]
    fn status_and_not_found() {
        let registry = ConnectionRegistry::new();
        let status = parse_request_line("GET /status HTTP/1.1").unwrap();
        let body = String::from_utf8(respond(&status, &registry)).unwrap();
        assert!(body.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(body.contains("Total Connections: 0"));

        let missing = parse_request_line("GET /help HTTP/1.1").unwrap();
        let body = String::from_utf8(respond(&missing, &registry)).unwrap();
        assert!(body.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(body.ends_with("\r\n\r\nNot Found\n"));
    }

    #[test]
    fn head_has_no_body() {
        let registry = ConnectionRegistry::new();
        let head = parse_request_line("HEAD /status HTTP/1.1").unwrap();
        let reply = String::from_utf8(respond(&head, &registry)).unwrap();
        assert!(reply.ends_with("\r\n\r\n"));
    }
}
