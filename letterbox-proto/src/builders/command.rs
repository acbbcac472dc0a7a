//! Wire text for each command the engine can issue. Quoting of LIST
//! arguments is supplied by the caller.

use crate::types::{CommandKind, FetchFields, SearchCriteria};

pub struct CommandBuilder {}

impl CommandBuilder {
    pub fn login(username: &str, password: &str) -> Command {
        Command {
            kind: CommandKind::Login,
            args: format!("LOGIN {username} {password}").into_bytes(),
        }
    }

    pub fn logout() -> Command {
        Command {
            kind: CommandKind::Logout,
            args: b"LOGOUT".to_vec(),
        }
    }

    pub fn list(reference: &str, pattern: &str) -> Command {
        Command {
            kind: CommandKind::List,
            args: format!("LIST {reference} {pattern}").into_bytes(),
        }
    }

    pub fn select(mailbox: &str) -> Command {
        Command {
            kind: CommandKind::Select,
            args: format!("SELECT {mailbox}").into_bytes(),
        }
    }

    pub fn noop() -> Command {
        Command {
            kind: CommandKind::Noop,
            args: b"NOOP".to_vec(),
        }
    }

    pub fn search(criteria: SearchCriteria) -> Command {
        Command {
            kind: CommandKind::Search,
            args: format!("SEARCH {}", criteria.as_str()).into_bytes(),
        }
    }

    /// `FETCH <range> (<sections…>)`. The range is `id` alone, or
    /// `id:id+range-1` when `range` covers more than one message.
    pub fn fetch(id: u64, fields: FetchFields, range: u64) -> Command {
        let range_spec = if range <= 1 {
            id.to_string()
        } else {
            format!("{}:{}", id, id + range - 1)
        };

        let mut sections = String::new();
        if fields.contains(FetchFields::ENVELOPE) {
            sections.push_str("BODY.PEEK[HEADER.FIELDS (DATE SUBJECT FROM TO)]");
            sections.push(' ');
        }
        if fields.contains(FetchFields::MIME) {
            sections.push_str("BODY.PEEK[HEADER.FIELDS (CONTENT-TYPE)] BODY.PEEK[1.MIME]");
            sections.push(' ');
        }
        if fields.contains(FetchFields::TEXT) {
            sections.push_str("BODY[1]");
            sections.push(' ');
        }

        Command {
            kind: CommandKind::Fetch,
            args: format!("FETCH {range_spec} ({sections})").into_bytes(),
        }
    }
}

/// A command ready to be tagged and written to the transport.
pub struct Command {
    kind: CommandKind,
    args: Vec<u8>,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn args(&self) -> &[u8] {
        &self.args
    }

    pub fn into_parts(self) -> (CommandKind, Vec<u8>) {
        let Command { kind, args } = self;
        (kind, args)
    }
}
