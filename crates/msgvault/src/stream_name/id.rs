use std::borrow::Cow;
use std::fmt;

/// The id portion of a stream name: everything after the first `-`. May
/// itself be compound, e.g. `123+456`, in which case the first `+`-separated
/// part is the cardinal id used for consumer-group partitioning.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ID<'a>(Cow<'a, str>);

impl<'a> ID<'a> {
    /// Separator between compound id parts.
    pub const COMPOUND_SEPARATOR: char = '+';

    pub fn new(id: impl Into<Cow<'a, str>>) -> Self {
        ID(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first `+`-separated part, or the whole id if it is not compound.
    pub fn cardinal_id(&self) -> &str {
        self.0
            .split_once(Self::COMPOUND_SEPARATOR)
            .map(|(cardinal, _)| cardinal)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ID<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ID<'_> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
