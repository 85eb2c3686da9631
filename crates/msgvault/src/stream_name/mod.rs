//! Stream names identify the ordered sequence a message belongs to.
//!
//! A stream name is `category[-id[+compound]]`: the **category** is the
//! substring before the first `-` (or the whole name if there is none); the
//! **id** is everything after that first `-`; the **cardinal id** is the
//! portion of the id before its first `+`, used as the consumer-group
//! partition key. All three extractions are total functions — every
//! stream name, including the empty string, produces a defined answer.

mod category;
mod id;

use std::borrow::Cow;
use std::fmt;

pub use self::category::Category;
pub use self::id::ID;

/// A borrowed-or-owned stream name, e.g. `account-123` or `account-123+456`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamName<'a>(Cow<'a, str>);

impl<'a> StreamName<'a> {
    /// Separator between a stream's category and its id.
    pub const ID_SEPARATOR: char = '-';

    pub fn new(name: impl Into<Cow<'a, str>>) -> Self {
        StreamName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_borrowed(&self) -> StreamName<'_> {
        StreamName(Cow::Borrowed(&self.0))
    }

    pub fn into_owned(self) -> StreamName<'static> {
        StreamName(Cow::Owned(self.0.into_owned()))
    }

    /// The category: substring up to (excluding) the first `-`, or the whole
    /// string if it contains no `-`.
    pub fn category(&self) -> Category<'_> {
        match self.0.split_once(Self::ID_SEPARATOR) {
            Some((category, _)) => Category::new(category),
            None => Category::new(self.0.as_ref()),
        }
    }

    /// The id: everything after the first `-`, or `None` if there is none.
    pub fn id(&self) -> Option<ID<'_>> {
        self.0
            .split_once(Self::ID_SEPARATOR)
            .map(|(_, id)| ID::new(id))
    }

    /// The cardinal id: the id's prefix before its first `+`, or empty if
    /// there is no id at all.
    pub fn cardinal_id(&self) -> &str {
        cardinal_id(&self.0)
    }

    /// Whether this name has no id portion, i.e. is a bare category name.
    pub fn is_category(&self) -> bool {
        !self.0.contains(Self::ID_SEPARATOR)
    }
}

/// Pure function form of [`StreamName::category`], for call sites that only
/// have a `&str` (RPC decoding, SQL-side mirrors, etc).
pub fn category(stream_name: &str) -> &str {
    stream_name
        .split_once(StreamName::ID_SEPARATOR)
        .map(|(category, _)| category)
        .unwrap_or(stream_name)
}

/// Pure function form of [`StreamName::id`].
pub fn id(stream_name: &str) -> &str {
    stream_name
        .split_once(StreamName::ID_SEPARATOR)
        .map(|(_, id)| id)
        .unwrap_or("")
}

/// Pure function form of [`StreamName::cardinal_id`].
pub fn cardinal_id(stream_name: &str) -> &str {
    id(stream_name)
        .split_once(ID::COMPOUND_SEPARATOR)
        .map(|(cardinal, _)| cardinal)
        .unwrap_or_else(|| id(stream_name))
}

/// Pure function form of [`StreamName::is_category`].
pub fn is_category(stream_name: &str) -> bool {
    !stream_name.contains(StreamName::ID_SEPARATOR)
}

impl fmt::Display for StreamName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamName<'_> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'a> From<&'a str> for StreamName<'a> {
    fn from(s: &'a str) -> Self {
        StreamName(Cow::Borrowed(s))
    }
}

impl From<String> for StreamName<'static> {
    fn from(s: String) -> Self {
        StreamName(Cow::Owned(s))
    }
}

impl PartialEq<str> for StreamName<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StreamName<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_with_no_id() {
        assert_eq!(category("account"), "account");
        assert_eq!(StreamName::from("account").category().as_str(), "account");
    }

    #[test]
    fn category_with_id() {
        assert_eq!(category("account-123"), "account");
    }

    #[test]
    fn id_extraction() {
        assert_eq!(id("account-123"), "123");
        assert_eq!(id("account"), "");
    }

    #[test]
    fn cardinal_id_extraction() {
        assert_eq!(cardinal_id("account-123+456"), "123");
        assert_eq!(cardinal_id("account-123"), "123");
        assert_eq!(cardinal_id("account"), "");
    }

    #[test]
    fn is_category_rules() {
        assert!(is_category("account"));
        assert!(!is_category("account-123"));
    }

    #[test]
    fn edge_cases_never_error() {
        for name in ["", " ", "-", "--", "+", "-+", "a-", "-a", "a-b+", "a-+b"] {
            let _ = category(name);
            let _ = id(name);
            let _ = cardinal_id(name);
            let _ = is_category(name);
        }
        assert_eq!(category(""), "");
        assert_eq!(id(""), "");
        assert_eq!(cardinal_id("-"), "");
        assert_eq!(cardinal_id("a-"), "");
        assert_eq!(id("a-"), "");
    }
}
