use super::*;

fn parse(line: &str) -> Request {
    Request::parse(line).unwrap_or_else(|e| panic!("parse of {line:?} failed: {e}"))
}

#[test]
fn test_parse_stats_and_version() {
    assert_eq!(parse("STATS").typ, RequestType::Stats);
    assert_eq!(parse("stats").typ, RequestType::Stats);
    assert_eq!(parse("VERSION").typ, RequestType::Version);
    assert_eq!(parse("version").typ, RequestType::Version);
}

#[test]
fn test_parse_flush() {
    let req = parse("FLUSH events");
    assert_eq!(req.typ, RequestType::Flush);
    assert_eq!(req.queue, "events");

    assert_eq!(parse("FLUSH_ALL").typ, RequestType::FlushAll);
    assert_eq!(parse("flush_all").typ, RequestType::FlushAll);
}

#[test]
fn test_parse_set() {
    let req = parse("SET jobs 0 0 512");
    assert_eq!(req.typ, RequestType::Set);
    assert_eq!(req.queue, "jobs");
    assert_eq!(req.num_bytes, 512);
}

#[test]
fn test_set_ignores_flags_and_expiry() {
    let req = parse("SET jobs 7 3600 12");
    assert_eq!(req.num_bytes, 12, "flags and expiry are wire-compat only");
}

#[test]
fn test_parse_get_plain() {
    let req = parse("GET jobs");
    assert_eq!(req.typ, RequestType::Get);
    assert_eq!(req.queue, "jobs");
    assert!(!req.get_open && !req.get_close && !req.get_abort && !req.get_peek);
    assert_eq!(req.wait_ms, 0);
}

#[test]
fn test_parse_get_aliases() {
    assert_eq!(parse("GETS jobs").typ, RequestType::Get);
    assert_eq!(parse("gets jobs").typ, RequestType::Get);
    assert_eq!(parse("get jobs").typ, RequestType::Get);
}

#[test]
fn test_parse_get_options() {
    let req = parse("GET jobs/close/open");
    assert!(req.get_close && req.get_open);

    let req = parse("GET jobs/abort");
    assert!(req.get_abort);

    let req = parse("GET jobs/peek");
    assert!(req.get_peek);

    let req = parse("GET jobs/t=2500");
    assert_eq!(req.wait_ms, 2500);

    let req = parse("GET jobs/open/t=100");
    assert!(req.get_open);
    assert_eq!(req.wait_ms, 100);
}

#[test]
fn test_parse_get_trailing_space() {
    let req = parse("GET jobs ");
    assert_eq!(req.queue, "jobs");

    let req = parse("GET jobs/t=10 ");
    assert_eq!(req.wait_ms, 10);
}

#[test]
fn test_queue_name_charset() {
    assert_eq!(parse("GET work-queue.v2:high").queue, "work-queue.v2:high");
    assert!(Request::parse("GET bad/queue").is_err(), "slash splits options");
    assert!(Request::parse("GET ").is_err());
    assert!(Request::parse("SET spaced name 0 0 5").is_err());
    assert!(Request::parse("GET caf\u{e9}").is_err(), "names are ascii");
}

#[test]
fn test_parse_rejects_malformed_lines() {
    for line in [
        "",
        "NONSENSE",
        "Get jobs", // keywords are case-sensitive, not case-insensitive
        "STATS jobs",
        "VERSION 2",
        "FLUSH",
        "FLUSH_ALL jobs",
        "GET",
        "GET jobs/bogus",
        "GET jobs/t=",
        "GET jobs/t=abc",
        "SET jobs",
        "SET jobs 0 0",
        "SET jobs 0 0 x",
        "SET jobs 0 0 5 6",
    ] {
        assert!(Request::parse(line).is_err(), "{line:?} should not parse");
    }
}

#[test]
fn test_reparse_starts_clean() {
    let first = parse("GET jobs/open/t=100");
    assert!(first.get_open);
    assert_eq!(first.wait_ms, 100);

    // nothing from the first request survives into the second
    let second = parse("GET jobs");
    assert!(!second.get_open);
    assert_eq!(second.wait_ms, 0);
    assert_eq!(second.num_bytes, 0);
}
