//! Search result model.
//!
//! A [`ResultSet`] is an ordered list of [`Entry`] values. All accessors
//! tolerate out-of-range indices and missing attribute names: they return
//! an empty placeholder entry, [`Attribute::Absent`], `0` or `None`
//! instead of failing. Check [`ResultSet::count_entries`] before assuming
//! a query matched anything.

use std::slice;

use crate::transport::RawEntry;

/// Values stored for one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Values {
    /// A bare single value (the entry `dn` is stored this way).
    Scalar(String),
    /// An ordered, non-empty list of values.
    List(Vec<String>),
}

/// Borrowed view of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute<'a> {
    /// The attribute is not present.
    Absent,
    /// A bare single value.
    Scalar(&'a str),
    /// A list of values.
    List(&'a [String]),
}

impl<'a> Attribute<'a> {
    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Absent => 0,
            Self::Scalar(_) => 1,
            Self::List(values) => values.len(),
        }
    }

    /// Checks whether the attribute has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&'a str> {
        match *self {
            Self::Absent => None,
            Self::Scalar(value) => (index == 0).then_some(value),
            Self::List(values) => values.get(index).map(String::as_str),
        }
    }

    /// All values, in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match *self {
            Self::Absent => Vec::new(),
            Self::Scalar(value) => vec![value.to_string()],
            Self::List(values) => values.to_vec(),
        }
    }
}

/// One directory entry: a DN plus its attributes.
///
/// The DN is also reachable as the scalar attribute `dn`. Attribute names
/// are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    dn: String,
    attributes: Vec<(String, Values)>,
}

static PLACEHOLDER: Entry = Entry {
    dn: String::new(),
    attributes: Vec::new(),
};

impl Entry {
    /// Converts a raw protocol entry, dropping value counts and skipping
    /// attributes that carry no values.
    #[must_use]
    pub fn from_raw(raw: RawEntry) -> Self {
        let mut attributes = Vec::with_capacity(raw.attributes.len() + 1);
        attributes.push(("dn".to_string(), Values::Scalar(raw.dn.clone())));

        for attr in raw.attributes {
            if attr.count == 0 || attr.values.is_empty() || attr.name.eq_ignore_ascii_case("dn") {
                continue;
            }
            attributes.push((attr.name, Values::List(attr.values)));
        }

        Self {
            dn: raw.dn,
            attributes,
        }
    }

    /// The entry DN (empty for the placeholder entry).
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Number of attributes, including `dn`.
    #[must_use]
    pub fn count_attributes(&self) -> usize {
        self.attributes.len()
    }

    /// Attribute names in server order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(name, _)| name.as_str())
    }

    /// Looks up an attribute; `wrap` turns a bare scalar into a
    /// one-element list.
    #[must_use]
    pub fn attribute(&self, name: &str, wrap: bool) -> Attribute<'_> {
        let Some((_, values)) = self
            .attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        else {
            return Attribute::Absent;
        };

        match values {
            Values::Scalar(value) if wrap => Attribute::List(slice::from_ref(value)),
            Values::Scalar(value) => Attribute::Scalar(value),
            Values::List(values) => Attribute::List(values),
        }
    }

    /// First value of an attribute.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attribute(name, false).get(0)
    }

    /// All values of an attribute.
    #[must_use]
    pub fn values(&self, name: &str) -> Vec<String> {
        self.attribute(name, true).to_vec()
    }
}

/// Ordered search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    entries: Vec<Entry>,
}

impl ResultSet {
    /// Creates a result set from converted entries.
    #[must_use]
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    /// Number of entries.
    #[must_use]
    pub fn count_entries(&self) -> usize {
        self.entries.len()
    }

    /// Entry at `index`, or an empty placeholder entry.
    #[must_use]
    pub fn get_entry(&self, index: usize) -> &Entry {
        self.entries.get(index).unwrap_or(&PLACEHOLDER)
    }

    /// Number of attributes of the entry at `index`.
    #[must_use]
    pub fn count_attributes(&self, index: usize) -> usize {
        self.get_entry(index).count_attributes()
    }

    /// Attribute `name` of the entry at `index`.
    #[must_use]
    pub fn get_attribute(&self, index: usize, name: &str, wrap: bool) -> Attribute<'_> {
        self.get_entry(index).attribute(name, wrap)
    }

    /// Number of values of attribute `name` of the entry at `index`.
    #[must_use]
    pub fn count_values(&self, index: usize, name: &str) -> usize {
        self.get_attribute(index, name, false).len()
    }

    /// Value `value_index` of attribute `name` of the entry at `index`.
    #[must_use]
    pub fn get_value(&self, index: usize, name: &str, value_index: usize) -> Option<&str> {
        self.get_attribute(index, name, false).get(value_index)
    }

    /// Iterates over the entries.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// DNs of every entry, in order.
    #[must_use]
    pub fn dns(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.dn.clone()).collect()
    }
}

impl FromIterator<RawEntry> for ResultSet {
    fn from_iter<I: IntoIterator<Item = RawEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Entry::from_raw).collect())
    }
}
