use std::collections::{BTreeMap, HashMap};
use std::ops::{BitOr, BitOrAssign};

/// Response keywords recognized by the accumulator, both in tagged and
/// untagged lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseCode {
    Ok,
    No,
    Bad,
    PreAuth,
    Bye,
    Capability,
    List,
    Lsub,
    Search,
    Flags,
    Exists,
    Recent,
    Expunge,
    Fetch,
    Mailbox,
    Copy,
    Store,
}

impl ResponseCode {
    /// Maps the wire keyword to its code. Unknown keywords fail the line.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "OK" => ResponseCode::Ok,
            "NO" => ResponseCode::No,
            "BAD" => ResponseCode::Bad,
            "PREAUTH" => ResponseCode::PreAuth,
            "BYE" => ResponseCode::Bye,
            "CAPABILITY" => ResponseCode::Capability,
            "LIST" => ResponseCode::List,
            "LSUB" => ResponseCode::Lsub,
            "SEARCH" => ResponseCode::Search,
            "FLAGS" => ResponseCode::Flags,
            "EXISTS" => ResponseCode::Exists,
            "RECENT" => ResponseCode::Recent,
            "EXPUNGE" => ResponseCode::Expunge,
            "FETCH" => ResponseCode::Fetch,
            "MAILBOX" => ResponseCode::Mailbox,
            "COPY" => ResponseCode::Copy,
            "STORE" => ResponseCode::Store,
            _ => return None,
        })
    }
}

/// The commands the engine can issue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandKind {
    Login,
    Logout,
    List,
    Select,
    Noop,
    Search,
    Fetch,
}

/// SEARCH criteria from RFC 3501; the wire form is the bare name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchCriteria {
    All,
    Answered,
    Deleted,
    Draft,
    Flagged,
    New,
    Old,
    Recent,
    Seen,
    Unanswered,
    Undeleted,
    Undraft,
    Unflagged,
    Unseen,
}

impl SearchCriteria {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchCriteria::All => "ALL",
            SearchCriteria::Answered => "ANSWERED",
            SearchCriteria::Deleted => "DELETED",
            SearchCriteria::Draft => "DRAFT",
            SearchCriteria::Flagged => "FLAGGED",
            SearchCriteria::New => "NEW",
            SearchCriteria::Old => "OLD",
            SearchCriteria::Recent => "RECENT",
            SearchCriteria::Seen => "SEEN",
            SearchCriteria::Unanswered => "UNANSWERED",
            SearchCriteria::Undeleted => "UNDELETED",
            SearchCriteria::Undraft => "UNDRAFT",
            SearchCriteria::Unflagged => "UNFLAGGED",
            SearchCriteria::Unseen => "UNSEEN",
        }
    }
}

/// Message parts selectable in a FETCH, combinable with `|`.
///
/// Each field expands to one or more `BODY` section specs on the wire; see
/// [`builders::command`](crate::builders::command).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FetchFields(u8);

impl FetchFields {
    /// Message date, subject, sender and recipient headers.
    pub const ENVELOPE: Self = FetchFields(1);
    /// Content type headers plus the first part's MIME header.
    pub const MIME: Self = FetchFields(1 << 1);
    /// Body of the first part.
    pub const TEXT: Self = FetchFields(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FetchFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        FetchFields(self.0 | rhs.0)
    }
}

impl BitOrAssign for FetchFields {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Successful LOGIN. No payload beyond the state change.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Login;

/// Successful LOGOUT.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Logout;

/// Successful NOOP.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Noop;

/// One mailbox from a LIST reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListItem {
    pub parent: String,
    pub name: String,
    pub attrs: Vec<String>,
}

pub type List = Vec<ListItem>;

/// SELECT summary for the chosen mailbox.
///
/// Numeric fields default to 0 when the server omits the corresponding
/// line, which is indistinguishable from an explicit zero.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Select {
    pub exists: u64,
    pub recent: u64,
    pub unseen: u64,
    pub uidvalidity: u64,
    pub flags: Vec<String>,
    pub permanent_flags: Vec<String>,
    /// Bracketed code of the tagged reply, e.g. `READ-WRITE`.
    pub permission: String,
}

/// Message sequence numbers matching a SEARCH.
pub type Search = Vec<u64>;

/// FETCH result: per-message map from the fetch section label as echoed by
/// the server (e.g. `BODY[1]`) to the raw bytes of that section.
pub type Fetch = BTreeMap<u64, HashMap<String, Vec<u8>>>;

/// A completed command's typed result, as delivered through the completion
/// handle and the readable queue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    Login(Login),
    Logout(Logout),
    Noop(Noop),
    List(List),
    Select(Select),
    Search(Search),
    Fetch(Fetch),
}
