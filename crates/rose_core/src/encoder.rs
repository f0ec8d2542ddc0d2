//! Attribute Encoder: raw element description to a fixed-width feature vector.
//!
//! Layout of the 25 dimensions:
//!
//! | range  | content                                  |
//! |--------|------------------------------------------|
//! | 0..9   | base predicates ([`Predicate`])          |
//! | 9..19  | designated pairwise ANDs ([`PAIRS`])     |
//! | 19..24 | designated triple ANDs ([`TRIPLES`])     |
//! | 24     | void marker: set iff no base predicate fired |
//!
//! Encoding is total. Missing or malformed attributes produce the void vector.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RoseError};

pub const FEATURE_DIM: usize = 25;
pub const NUM_BASE: usize = 9;
pub const PAIR_OFFSET: usize = NUM_BASE;
pub const TRIPLE_OFFSET: usize = PAIR_OFFSET + PAIRS.len();
pub const VOID_INDEX: usize = FEATURE_DIM - 1;

/// The nine base predicates, in vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Predicate {
    Visible = 0,
    HasText = 1,
    Clickable = 2,
    Link = 3,
    Input = 4,
    Image = 5,
    ListItem = 6,
    Container = 7,
    Heading = 8,
}

impl Predicate {
    pub const ALL: [Predicate; NUM_BASE] = [
        Predicate::Visible,
        Predicate::HasText,
        Predicate::Clickable,
        Predicate::Link,
        Predicate::Input,
        Predicate::Image,
        Predicate::ListItem,
        Predicate::Container,
        Predicate::Heading,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

use Predicate::*;

/// Pairwise combinations occupying positions 9..19.
pub const PAIRS: [(Predicate, Predicate); 10] = [
    (Visible, HasText),
    (Visible, Clickable),
    (HasText, Link),
    (Clickable, Link),
    (Clickable, Input),
    (Image, Link),
    (ListItem, Link),
    (ListItem, HasText),
    (Container, ListItem),
    (Heading, HasText),
];

/// Triple combinations occupying positions 19..24.
pub const TRIPLES: [(Predicate, Predicate, Predicate); 5] = [
    (Visible, Clickable, Link),
    (Visible, HasText, Heading),
    (ListItem, Clickable, Link),
    (Container, ListItem, HasText),
    (Visible, Clickable, Input),
];

const INPUT_TAGS: [&str; 3] = ["input", "textarea", "select"];
const INPUT_ROLES: [&str; 5] = ["textbox", "combobox", "searchbox", "checkbox", "radio"];
const IMAGE_TAGS: [&str; 4] = ["img", "svg", "picture", "canvas"];
const LIST_ITEM_TAGS: [&str; 5] = ["li", "option", "tr", "dt", "dd"];
const LIST_ITEM_ROLES: [&str; 4] = ["listitem", "option", "menuitem", "row"];
const CONTAINER_TAGS: [&str; 14] = [
    "div", "section", "ul", "ol", "nav", "table", "form", "main", "article", "aside", "header",
    "footer", "menu", "dl",
];
const HEADING_TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

/// Raw attribute set for one element, as delivered by the extraction layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAttributes {
    /// Tag name (case-insensitive)
    #[serde(default)]
    pub tag: String,
    /// ARIA role hint
    #[serde(default)]
    pub role: Option<String>,
    /// Length of the element's own visible text
    #[serde(default)]
    pub text_len: usize,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub clickable: bool,
    /// Element carries an href
    #[serde(default)]
    pub href: bool,
    #[serde(default)]
    pub child_count: usize,
}

impl RawAttributes {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: String::from(tag),
            ..Self::default()
        }
    }

    fn tag_is(&self, names: &[&str]) -> bool {
        let tag = self.tag.trim();
        names.iter().any(|n| tag.eq_ignore_ascii_case(n))
    }

    fn role_is(&self, names: &[&str]) -> bool {
        match &self.role {
            Some(role) => {
                let role = role.trim();
                names.iter().any(|n| role.eq_ignore_ascii_case(n))
            }
            None => false,
        }
    }

    fn is_malformed(&self) -> bool {
        self.tag.trim().is_empty()
    }

    /// Evaluate one base predicate.
    pub fn holds(&self, predicate: Predicate) -> bool {
        match predicate {
            Visible => self.visible,
            HasText => self.text_len > 0,
            Clickable => self.clickable || self.tag_is(&["button", "summary"]),
            Link => (self.tag_is(&["a"]) && self.href) || self.role_is(&["link"]),
            Input => self.tag_is(&INPUT_TAGS) || self.role_is(&INPUT_ROLES),
            Image => self.tag_is(&IMAGE_TAGS) || self.role_is(&["img"]),
            ListItem => self.tag_is(&LIST_ITEM_TAGS) || self.role_is(&LIST_ITEM_ROLES),
            Container => self.tag_is(&CONTAINER_TAGS) || self.child_count >= 2,
            Heading => self.tag_is(&HEADING_TAGS) || self.role_is(&["heading"]),
        }
    }
}

/// A 25-dimensional feature vector with every component in [0, 1].
///
/// The only ways to build one are the validated constructors, so a value of
/// this type always satisfies the length and range invariant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct FeatureVector([f64; FEATURE_DIM]);

impl FeatureVector {
    pub fn zeros() -> Self {
        FeatureVector([0.0; FEATURE_DIM])
    }

    /// The "nothing recognisable here" vector.
    pub fn void() -> Self {
        let mut v = [0.0; FEATURE_DIM];
        v[VOID_INDEX] = 1.0;
        FeatureVector(v)
    }

    /// Validate a slice coming from outside the engine.
    pub fn try_from_slice(values: &[f64]) -> Result<Self> {
        if values.len() != FEATURE_DIM {
            return Err(RoseError::MalformedInput(alloc::format!(
                "feature vector has {} components, expected {}",
                values.len(),
                FEATURE_DIM
            )));
        }
        let mut v = [0.0; FEATURE_DIM];
        for (i, &x) in values.iter().enumerate() {
            if !x.is_finite() || !(0.0..=1.0).contains(&x) {
                return Err(RoseError::MalformedInput(alloc::format!(
                    "component {} = {} outside [0, 1]",
                    i, x
                )));
            }
            v[i] = x;
        }
        Ok(FeatureVector(v))
    }

    /// Clamp arbitrary values into range; non-finite components become 0.
    pub fn clamped(values: [f64; FEATURE_DIM]) -> Self {
        let mut v = values;
        for x in v.iter_mut() {
            *x = if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 };
        }
        FeatureVector(v)
    }

    pub fn as_array(&self) -> &[f64; FEATURE_DIM] {
        &self.0
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }

    pub fn dot(&self, other: &FeatureVector) -> f64 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    pub fn is_void(&self) -> bool {
        self.0[VOID_INDEX] > 0.0
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::zeros()
    }
}

impl TryFrom<Vec<f64>> for FeatureVector {
    type Error = RoseError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::try_from_slice(&values)
    }
}

impl From<FeatureVector> for Vec<f64> {
    fn from(v: FeatureVector) -> Self {
        v.0.to_vec()
    }
}

/// Encode one element. Pure and deterministic.
pub fn encode(raw: &RawAttributes) -> FeatureVector {
    if raw.is_malformed() {
        return FeatureVector::void();
    }

    let mut base = [false; NUM_BASE];
    for p in Predicate::ALL {
        base[p.index()] = raw.holds(p);
    }
    encode_predicates(&base)
}

/// Encode attributes that may be missing entirely.
pub fn encode_opt(raw: Option<&RawAttributes>) -> FeatureVector {
    raw.map(encode).unwrap_or_else(FeatureVector::void)
}

/// Build the vector from already-evaluated base predicates.
pub fn encode_predicates(base: &[bool; NUM_BASE]) -> FeatureVector {
    let mut v = [0.0; FEATURE_DIM];
    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    for (i, &b) in base.iter().enumerate() {
        v[i] = flag(b);
    }
    for (k, (a, b)) in PAIRS.iter().enumerate() {
        v[PAIR_OFFSET + k] = flag(base[a.index()] && base[b.index()]);
    }
    for (k, (a, b, c)) in TRIPLES.iter().enumerate() {
        v[TRIPLE_OFFSET + k] = flag(base[a.index()] && base[b.index()] && base[c.index()]);
    }
    if !base.iter().any(|&b| b) {
        v[VOID_INDEX] = 1.0;
    }
    FeatureVector(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nav_link() -> RawAttributes {
        RawAttributes {
            tag: "A".into(),
            role: None,
            text_len: 12,
            visible: true,
            clickable: true,
            href: true,
            child_count: 0,
        }
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(TRIPLE_OFFSET, 19);
        assert_eq!(TRIPLE_OFFSET + TRIPLES.len(), VOID_INDEX);
    }

    #[test]
    fn test_visible_link() {
        let v = encode(&nav_link());
        assert_eq!(v.get(Visible.index()), 1.0);
        assert_eq!(v.get(Link.index()), 1.0);
        assert_eq!(v.get(Input.index()), 0.0);
        // (Visible, Clickable, Link) triple
        assert_eq!(v.get(TRIPLE_OFFSET), 1.0);
        assert!(!v.is_void());
    }

    #[test]
    fn test_pairs_are_ands() {
        let v = encode(&nav_link());
        for (k, (a, b)) in PAIRS.iter().enumerate() {
            let expected = v.get(a.index()) * v.get(b.index());
            assert_eq!(v.get(PAIR_OFFSET + k), expected, "pair {}", k);
        }
    }

    #[test]
    fn test_malformed_maps_to_void() {
        assert_eq!(encode(&RawAttributes::new("   ")), FeatureVector::void());
        assert_eq!(encode_opt(None), FeatureVector::void());
    }

    #[test]
    fn test_nothing_fired_sets_void_marker() {
        // A hidden, empty span matches no predicate
        let v = encode(&RawAttributes::new("span"));
        assert!(v.is_void());
        assert_eq!(v.as_array().iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_role_hints() {
        let mut raw = RawAttributes::new("div");
        raw.role = Some("TextBox".into());
        assert!(raw.holds(Input));
        assert!(raw.holds(Container));
    }

    #[test]
    fn test_slice_validation() {
        assert!(matches!(
            FeatureVector::try_from_slice(&[0.0; 24]),
            Err(RoseError::MalformedInput(_))
        ));
        let mut bad = [0.0; FEATURE_DIM];
        bad[3] = 1.5;
        assert!(FeatureVector::try_from_slice(&bad).is_err());
        bad[3] = f64::NAN;
        assert!(FeatureVector::try_from_slice(&bad).is_err());
        assert!(FeatureVector::try_from_slice(&[0.5; FEATURE_DIM]).is_ok());
    }

    #[test]
    fn test_clamped() {
        let mut raw = [0.5; FEATURE_DIM];
        raw[0] = -3.0;
        raw[1] = 9.0;
        raw[2] = f64::NAN;
        let v = FeatureVector::clamped(raw);
        assert_eq!(v.get(0), 0.0);
        assert_eq!(v.get(1), 1.0);
        assert_eq!(v.get(2), 0.0);
        assert_eq!(v.get(3), 0.5);
    }
}
