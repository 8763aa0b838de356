//! Pest grammar parser for compound CSS selectors

use pest::Parser;
use pest_derive::Parser;

use crate::error::{HostError, Result};

use super::tree::Element;

#[derive(Parser)]
#[grammar = "../grammar/selector.pest"]
struct SelectorParser;

/// A parsed selector list, e.g. `link[data-micro-app="alpha"], #root`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    alternatives: Vec<Compound>,
}

/// One compound selector: optional tag plus id, class and attribute tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub ids: Vec<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<AttributeMatch>,
}

/// `[name]` or `[name=value]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMatch {
    pub name: String,
    pub value: Option<String>,
}

impl Selector {
    /// Parse a selector list
    pub fn parse(input: &str) -> Result<Self> {
        let pairs = SelectorParser::parse(Rule::selector_list, input)
            .map_err(|e| HostError::Selector(format!("'{}': {}", input, e)))?;

        let list = pairs
            .into_iter()
            .next()
            .ok_or_else(|| HostError::Selector("empty selector".to_string()))?;

        let mut alternatives = Vec::new();
        for pair in list.into_inner() {
            if pair.as_rule() == Rule::compound {
                alternatives.push(parse_compound(pair)?);
            }
        }

        Ok(Self { alternatives })
    }

    /// The compound selectors in this list
    pub fn alternatives(&self) -> &[Compound] {
        &self.alternatives
    }

    /// The id targeted by a plain `#id` selector
    pub fn as_id(&self) -> Option<&str> {
        match self.alternatives.as_slice() {
            [only]
                if only.tag.is_none()
                    && only.ids.len() == 1
                    && only.classes.is_empty()
                    && only.attributes.is_empty() =>
            {
                Some(&only.ids[0])
            }
            _ => None,
        }
    }

    /// Whether any alternative matches the element
    pub fn matches(&self, element: &Element) -> bool {
        self.alternatives.iter().any(|c| c.matches(element))
    }
}

impl Compound {
    /// Whether every test in the compound holds for the element
    pub fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if !tag.eq_ignore_ascii_case(element.tag()) {
                return false;
            }
        }

        if !self.ids.iter().all(|id| element.attr("id") == Some(id.as_str())) {
            return false;
        }

        if !self.classes.is_empty() {
            let classes: Vec<&str> = element
                .attr("class")
                .map(|c| c.split_whitespace().collect())
                .unwrap_or_default();
            if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }

        self.attributes.iter().all(|a| match (&a.value, element.attr(&a.name)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(expected), Some(actual)) => expected == actual,
        })
    }
}

fn parse_compound(pair: pest::iterators::Pair<Rule>) -> Result<Compound> {
    let mut compound = Compound::default();

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::tag => {
                let tag = part.as_str();
                if tag != "*" {
                    compound.tag = Some(tag.to_ascii_lowercase());
                }
            }
            Rule::id_sel => compound.ids.push(inner_name(part)?),
            Rule::class_sel => compound.classes.push(inner_name(part)?),
            Rule::attr_sel => compound.attributes.push(parse_attribute(part)?),
            other => {
                return Err(HostError::Selector(format!(
                    "Unexpected rule in selector: {:?}",
                    other
                )))
            }
        }
    }

    Ok(compound)
}

fn inner_name(pair: pest::iterators::Pair<Rule>) -> Result<String> {
    pair.into_inner()
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| HostError::Selector("Expected name".to_string()))
}

fn parse_attribute(pair: pest::iterators::Pair<Rule>) -> Result<AttributeMatch> {
    let mut inner = pair.into_inner();

    let name = inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| HostError::Selector("Expected attribute name".to_string()))?;

    let value = match inner.next() {
        None => None,
        Some(v) if v.as_rule() == Rule::quoted => {
            Some(v.into_inner().next().map(|p| p.as_str().to_string()).unwrap_or_default())
        }
        Some(v) => Some(v.as_str().to_string()),
    };

    Ok(AttributeMatch { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let sel = Selector::parse("#alpha").unwrap();
        assert_eq!(sel.as_id(), Some("alpha"));
    }

    #[test]
    fn test_parse_tag_with_attribute() {
        let sel = Selector::parse(r#"link[data-micro-app="alpha"]"#).unwrap();
        let compound = &sel.alternatives()[0];
        assert_eq!(compound.tag.as_deref(), Some("link"));
        assert_eq!(
            compound.attributes,
            vec![AttributeMatch {
                name: "data-micro-app".to_string(),
                value: Some("alpha".to_string()),
            }]
        );
        assert!(sel.as_id().is_none());
    }

    #[test]
    fn test_parse_list_and_classes() {
        let sel = Selector::parse("div.card.active, [hidden], *").unwrap();
        assert_eq!(sel.alternatives().len(), 3);
        assert_eq!(sel.alternatives()[0].classes, vec!["card", "active"]);
        assert!(sel.alternatives()[1].attributes[0].value.is_none());
        assert!(sel.alternatives()[2].tag.is_none());
    }

    #[test]
    fn test_single_quoted_and_bare_values() {
        let sel = Selector::parse("[rel='stylesheet'][type=module]").unwrap();
        let attrs = &sel.alternatives()[0].attributes;
        assert_eq!(attrs[0].value.as_deref(), Some("stylesheet"));
        assert_eq!(attrs[1].value.as_deref(), Some("module"));
    }

    #[test]
    fn test_rejects_combinators() {
        assert!(Selector::parse("div > p").is_err());
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("#").is_err());
    }

    #[test]
    fn test_matches() {
        let el = Element::new("DIV")
            .with_attr("id", "alpha")
            .with_attr("class", "card active");
        assert!(Selector::parse("#alpha").unwrap().matches(&el));
        assert!(Selector::parse("div.card").unwrap().matches(&el));
        assert!(Selector::parse("div#alpha.active").unwrap().matches(&el));
        assert!(!Selector::parse("span#alpha").unwrap().matches(&el));
        assert!(!Selector::parse(".missing").unwrap().matches(&el));
        assert!(Selector::parse("[id]").unwrap().matches(&el));
        assert!(!Selector::parse("[id=beta]").unwrap().matches(&el));
    }
}
