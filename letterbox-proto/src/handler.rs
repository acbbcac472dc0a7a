//! Converts a completed [`Accumulator`] into the typed result of the
//! command that produced it.
//!
//! Every handler performs the same triage on the single tagged line first
//! (NO and BAD map to command-specific error kinds), then reads the
//! untagged data it cares about. Malformed untagged lines inside an
//! otherwise valid response are logged and skipped, never fatal.

use tracing::warn;

use crate::error::Error;
use crate::parser;
use crate::response::Accumulator;
use crate::types::{
    CommandKind, Fetch, List, Login, Logout, Noop, Payload, ResponseCode, Search, Select,
};

/// Runs the handler matching `kind` on a completed response.
pub fn dispatch(kind: CommandKind, resp: Accumulator) -> Result<Payload, Error> {
    match kind {
        CommandKind::Login => login(&resp).map(Payload::Login),
        CommandKind::Logout => logout(&resp).map(Payload::Logout),
        CommandKind::Noop => noop(&resp).map(Payload::Noop),
        CommandKind::List => list(&resp).map(Payload::List),
        CommandKind::Select => select(&resp).map(Payload::Select),
        CommandKind::Search => search(&resp).map(Payload::Search),
        CommandKind::Fetch => fetch(resp).map(Payload::Fetch),
    }
}

// The single tagged line every normal command must end with.
fn sole_tagged(resp: &Accumulator) -> Result<(ResponseCode, &str), Error> {
    match resp.tagged() {
        [(code, data)] => Ok((*code, data.as_str())),
        _ => Err(Error::Unexpected("unexpected tagged response".to_string())),
    }
}

pub fn login(resp: &Accumulator) -> Result<Login, Error> {
    match sole_tagged(resp)? {
        (ResponseCode::Ok, _) => Ok(Login),
        (ResponseCode::No, data) => Err(Error::Login(data.to_string())),
        (ResponseCode::Bad, data) => Err(Error::BadCommand(data.to_string())),
        _ => Err(Error::Unexpected("unexpected tagged response".to_string())),
    }
}

pub fn logout(resp: &Accumulator) -> Result<Logout, Error> {
    match sole_tagged(resp)? {
        (ResponseCode::Ok, _) => Ok(Logout),
        (_, data) => Err(Error::BadCommand(data.to_string())),
    }
}

pub fn noop(resp: &Accumulator) -> Result<Noop, Error> {
    match sole_tagged(resp)? {
        (ResponseCode::Ok, _) => Ok(Noop),
        (_, data) => Err(Error::BadCommand(data.to_string())),
    }
}

pub fn list(resp: &Accumulator) -> Result<List, Error> {
    match sole_tagged(resp)? {
        (ResponseCode::No, data) => return Err(Error::Reference(data.to_string())),
        (ResponseCode::Bad, data) => return Err(Error::BadCommand(data.to_string())),
        _ => {}
    }

    let mut items = List::new();
    for (code, data) in resp.untagged() {
        if *code != ResponseCode::List {
            warn!(?code, "failed to parse LIST response: unexpected type");
            continue;
        }
        match parser::list_item(data) {
            Ok((_, item)) => items.push(item),
            Err(_) => warn!(%data, "failed to parse LIST response: unexpected format"),
        }
    }
    Ok(items)
}

pub fn select(resp: &Accumulator) -> Result<Select, Error> {
    let tagged = match sole_tagged(resp)? {
        (ResponseCode::No, data) => return Err(Error::Reference(data.to_string())),
        (ResponseCode::Bad, data) => return Err(Error::BadCommand(data.to_string())),
        (_, data) => data,
    };

    let mut select = Select::default();

    match parser::bracketed(tagged) {
        Some((permission, _)) => select.permission = permission.to_string(),
        None => warn!(tagged, "failed to parse permission from SELECT response"),
    }

    for (code, data) in resp.untagged_trailing() {
        let target = match code {
            ResponseCode::Exists => &mut select.exists,
            ResponseCode::Recent => &mut select.recent,
            _ => continue,
        };
        match data.parse::<u64>() {
            Ok(count) => *target = count,
            Err(_) => warn!(?code, %data, "failed to parse SELECT count: not a number"),
        }
    }

    for (code, data) in resp.untagged() {
        if *code == ResponseCode::Flags {
            if let Some(attrs) = parser::parenthesized(data) {
                select.flags = parser::split_attrs(attrs);
            }
            continue;
        }
        if *code != ResponseCode::Ok {
            continue;
        }
        let Some((ty, Some(payload))) = parser::bracketed(data) else {
            continue;
        };
        match ty {
            "UNSEEN" => match payload.parse::<u64>() {
                Ok(unseen) => select.unseen = unseen,
                Err(_) => warn!(payload, "failed to parse SELECT UNSEEN: not a number"),
            },
            "UIDVALIDITY" => match payload.parse::<u64>() {
                Ok(uidvalidity) => select.uidvalidity = uidvalidity,
                Err(_) => warn!(payload, "failed to parse SELECT UIDVALIDITY: not a number"),
            },
            "PERMANENTFLAGS" => select.permanent_flags = parser::split_attrs(payload),
            _ => {}
        }
    }

    Ok(select)
}

pub fn search(resp: &Accumulator) -> Result<Search, Error> {
    match sole_tagged(resp)? {
        (ResponseCode::No, data) => return Err(Error::Reference(data.to_string())),
        (ResponseCode::Bad, data) => return Err(Error::BadCommand(data.to_string())),
        _ => {}
    }

    let [(_, data)] = resp.untagged() else {
        return Err(Error::Unexpected("unexpected untagged response".to_string()));
    };

    let mut ids = Search::new();
    for item in data.split(' ').filter(|item| !item.is_empty()) {
        match item.parse::<u64>() {
            Ok(id) => ids.push(id),
            Err(_) => warn!(item, "failed to parse SEARCH response: not a number"),
        }
    }
    Ok(ids)
}

pub fn fetch(resp: Accumulator) -> Result<Fetch, Error> {
    match sole_tagged(&resp)? {
        (ResponseCode::No, data) => return Err(Error::Reference(data.to_string())),
        (ResponseCode::Bad, data) => return Err(Error::BadCommand(data.to_string())),
        _ => {}
    }
    Ok(resp.into_literals())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Digest;
    use crate::tag::Tag;
    use assert_matches::assert_matches;

    fn completed(tag: &str, stream: &[u8]) -> Accumulator {
        let mut resp = Accumulator::new(Tag(tag.to_string()));
        assert_eq!(resp.digest(stream), Digest::Complete);
        resp
    }

    #[test]
    fn test_login_ok() {
        let resp = completed("A000", b"A000 OK LOGIN completed\r\n");
        assert_matches!(login(&resp), Ok(Login));
    }

    #[test]
    fn test_login_refused() {
        let resp = completed("A000", b"A000 NO bad credentials\r\n");
        assert_eq!(login(&resp), Err(Error::Login("bad credentials".to_string())));
    }

    #[test]
    fn test_login_bad_syntax() {
        let resp = completed("A000", b"A000 BAD syntax\r\n");
        assert_eq!(login(&resp), Err(Error::BadCommand("syntax".to_string())));
    }

    #[test]
    fn test_noop_bad() {
        let resp = completed("A000", b"A000 BAD syntax\r\n");
        assert_eq!(noop(&resp), Err(Error::BadCommand("syntax".to_string())));
    }

    #[test]
    fn test_logout_ok() {
        let resp = completed("A005", b"* BYE logging out\r\nA005 OK LOGOUT completed\r\n");
        assert_matches!(logout(&resp), Ok(Logout));
    }

    #[test]
    fn test_list_items() {
        let resp = completed(
            "A001",
            b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n\
              * LIST (\\HasChildren) \"/\" \"Sent\"\r\n\
              A001 OK LIST completed\r\n",
        );
        let items = list(&resp).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].parent, "/");
        assert_eq!(items[0].name, "INBOX");
        assert_eq!(items[0].attrs, vec!["HasNoChildren".to_string()]);
        assert_eq!(items[1].name, "Sent");
        assert_eq!(items[1].attrs, vec!["HasChildren".to_string()]);
    }

    #[test]
    fn test_list_skips_unparseable_lines() {
        let resp = completed(
            "A001",
            b"* LIST gibberish\r\n\
              * LIST (\\HasChildren) \"/\" \"Sent\"\r\n\
              A001 OK LIST completed\r\n",
        );
        let items = list(&resp).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Sent");
    }

    #[test]
    fn test_list_no_is_reference_error() {
        let resp = completed("A001", b"A001 NO no such reference\r\n");
        assert_eq!(
            list(&resp),
            Err(Error::Reference("no such reference".to_string()))
        );
    }

    #[test]
    fn test_select_full() {
        let resp = completed(
            "A002",
            b"* FLAGS (\\Answered \\Seen)\r\n\
              * 12 EXISTS\r\n\
              * 3 RECENT\r\n\
              * OK [UNSEEN 5] first unseen\r\n\
              * OK [UIDVALIDITY 1234] uid valid\r\n\
              * OK [PERMANENTFLAGS (\\Seen)] perm\r\n\
              A002 OK [READ-WRITE] SELECT done\r\n",
        );
        let summary = select(&resp).unwrap();
        assert_eq!(
            summary,
            Select {
                exists: 12,
                recent: 3,
                unseen: 5,
                uidvalidity: 1234,
                flags: vec!["Answered".to_string(), "Seen".to_string()],
                permanent_flags: vec!["Seen".to_string()],
                permission: "READ-WRITE".to_string(),
            }
        );
    }

    #[test]
    fn test_select_is_idempotent_over_same_bytes() {
        let stream = b"* 7 EXISTS\r\nA002 OK [READ-ONLY] SELECT done\r\n";
        let first = select(&completed("A002", stream)).unwrap();
        let second = select(&completed("A002", stream)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_select_missing_fields_default_to_zero() {
        let resp = completed("A002", b"A002 OK [READ-WRITE] SELECT done\r\n");
        let summary = select(&resp).unwrap();
        assert_eq!(summary.exists, 0);
        assert_eq!(summary.recent, 0);
        assert_eq!(summary.unseen, 0);
        assert_eq!(summary.uidvalidity, 0);
        assert!(summary.flags.is_empty());
    }

    #[test]
    fn test_search_ids() {
        let resp = completed("A003", b"* SEARCH 1 3 5\r\nA003 OK SEARCH done\r\n");
        assert_eq!(search(&resp).unwrap(), vec![1, 3, 5]);
    }

    #[test]
    fn test_search_skips_non_numeric_tokens() {
        let resp = completed("A003", b"* SEARCH 1 x 5\r\nA003 OK SEARCH done\r\n");
        assert_eq!(search(&resp).unwrap(), vec![1, 5]);
    }

    #[test]
    fn test_search_requires_one_untagged() {
        let resp = completed("A003", b"A003 OK SEARCH done\r\n");
        assert_matches!(search(&resp), Err(Error::Unexpected(_)));
    }

    #[test]
    fn test_fetch_returns_literals() {
        let resp = completed(
            "A004",
            b"* 1 FETCH (BODY[1] {11}\r\nHello World\r\n)\r\nA004 OK FETCH done\r\n",
        );
        let payload = fetch(resp).unwrap();
        assert_eq!(payload[&1]["BODY[1]"], b"Hello World".to_vec());
    }

    #[test]
    fn test_fetch_no_is_reference_error() {
        let resp = completed("A004", b"A004 NO no such message\r\n");
        assert_eq!(
            fetch(resp),
            Err(Error::Reference("no such message".to_string()))
        );
    }
}
