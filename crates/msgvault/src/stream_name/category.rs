use std::borrow::Cow;
use std::fmt;

/// The category portion of a stream name: the substring before the first
/// `-`, or the whole stream name when it contains no `-`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Category<'a>(Cow<'a, str>);

impl<'a> Category<'a> {
    pub fn new(category: impl Into<Cow<'a, str>>) -> Self {
        Category(category.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0.into_owned()
    }

    pub fn into_owned(self) -> Category<'static> {
        Category(Cow::Owned(self.0.into_owned()))
    }
}

impl fmt::Display for Category<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Category<'_> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Category<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Category<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
