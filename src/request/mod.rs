#[cfg(test)]
mod request_test;

use crate::error::{Error, Result};

/// One parsed request line. Keywords are uppercase canonical with a
/// lowercase alias; `GETS` is accepted as an alias for `GET`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Request {
    pub typ: RequestType,
    pub queue: String,
    pub num_bytes: u32,
    pub get_open: bool,
    pub get_close: bool,
    pub get_abort: bool,
    pub get_peek: bool,
    pub wait_ms: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    #[default]
    Stats,
    Version,
    Flush,
    FlushAll,
    Set,
    Get,
}

impl Request {
    /// Parses one request line, terminator already stripped. Every parse
    /// starts from a blank record, so nothing leaks from a prior request.
    pub fn parse(line: &str) -> Result<Request> {
        let mut req = Request::default();

        let (keyword, rest) = match line.split_once(' ') {
            Some((keyword, rest)) => (keyword, Some(rest)),
            None => (line, None),
        };

        match keyword {
            "STATS" | "stats" if rest.is_none() => {
                req.typ = RequestType::Stats;
            }
            "VERSION" | "version" if rest.is_none() => {
                req.typ = RequestType::Version;
            }
            "FLUSH_ALL" | "flush_all" if rest.is_none() => {
                req.typ = RequestType::FlushAll;
            }
            "FLUSH" | "flush" => {
                let rest = rest.ok_or(Error::ErrParse)?;
                req.typ = RequestType::Flush;
                req.queue = parse_queue_name(rest.strip_suffix(' ').unwrap_or(rest))?;
            }
            "SET" | "set" => {
                // SET <queue> <flags> <expiry> <bytes>; flags and expiry are
                // parsed for wire compatibility and ignored
                let rest = rest.ok_or(Error::ErrParse)?;
                let mut fields = rest.split(' ');
                req.typ = RequestType::Set;
                req.queue = parse_queue_name(fields.next().ok_or(Error::ErrParse)?)?;
                let _flags = parse_u32(fields.next())?;
                let _expiry = parse_u32(fields.next())?;
                req.num_bytes = parse_u32(fields.next())?;
                if fields.next().is_some() {
                    return Err(Error::ErrParse);
                }
            }
            "GET" | "get" | "GETS" | "gets" => {
                let rest = rest.ok_or(Error::ErrParse)?;
                // a trailing space after the key is tolerated
                let rest = rest.strip_suffix(' ').unwrap_or(rest);
                req.typ = RequestType::Get;
                let mut parts = rest.split('/');
                req.queue = parse_queue_name(parts.next().unwrap_or_default())?;
                for option in parts {
                    match option {
                        "open" => req.get_open = true,
                        "close" => req.get_close = true,
                        "abort" => req.get_abort = true,
                        "peek" => req.get_peek = true,
                        _ => {
                            let ms = option.strip_prefix("t=").ok_or(Error::ErrParse)?;
                            req.wait_ms = ms.parse().map_err(|_| Error::ErrParse)?;
                        }
                    }
                }
            }
            _ => return Err(Error::ErrParse),
        }

        Ok(req)
    }
}

/// Queue names are alphanumerics plus punctuation, minus the option
/// separator `/`.
fn parse_queue_name(name: &str) -> Result<String> {
    let valid = |b: u8| b.is_ascii_alphanumeric() || (b.is_ascii_punctuation() && b != b'/');
    if name.is_empty() || !name.bytes().all(valid) {
        return Err(Error::ErrParse);
    }
    Ok(name.to_owned())
}

fn parse_u32(field: Option<&str>) -> Result<u32> {
    field
        .ok_or(Error::ErrParse)?
        .parse()
        .map_err(|_| Error::ErrParse)
}
