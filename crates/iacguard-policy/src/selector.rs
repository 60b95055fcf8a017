use crate::document::SelectorDoc;
use crate::input::{Input, Subtype};
use iacguard_types::ids::{INPUT_TYPE_CLOUD, canonical_input_type};

/// Input-type matcher declared by a policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    pub kind: String,
    /// Empty means every subtype of `kind`.
    pub subtypes: Vec<Subtype>,
}

impl Selector {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subtypes: Vec::new(),
        }
    }

    pub fn with_subtype(mut self, subtype: Subtype) -> Self {
        self.subtypes.push(subtype);
        self
    }

    pub fn matches(&self, input: &Input) -> bool {
        if canonical_input_type(&self.kind) != canonical_input_type(&input.kind) {
            return false;
        }
        self.subtypes.is_empty()
            || self
                .subtypes
                .iter()
                .any(|wanted| input.subtypes.iter().any(|have| subtype_matches(wanted, have)))
    }
}

impl From<&SelectorDoc> for Selector {
    fn from(doc: &SelectorDoc) -> Self {
        Self {
            kind: doc.kind.clone(),
            subtypes: doc
                .subtypes
                .iter()
                .map(|s| Subtype {
                    provider: s.provider.clone(),
                    service: s.service.clone(),
                })
                .collect(),
        }
    }
}

fn subtype_matches(wanted: &Subtype, have: &Subtype) -> bool {
    let field = |w: &Option<String>, h: &Option<String>| match w {
        None => true,
        Some(w) => h.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(w)),
    };
    field(&wanted.provider, &have.provider) && field(&wanted.service, &have.service)
}

/// Gate applied before a policy runs on an input. A policy without selectors runs for
/// every input of its schema's kind (cloud when it declares none).
pub fn selectors_match(selectors: &[Selector], schema: Option<&str>, input: &Input) -> bool {
    if selectors.is_empty() {
        let kind = schema.unwrap_or(INPUT_TYPE_CLOUD);
        return canonical_input_type(kind) == canonical_input_type(&input.kind);
    }
    selectors.iter().any(|s| s.matches(input))
}
