//! Attributed tree used to save and restore instruments.
//!
//! The engine never reads or writes files itself. Instruments serialise their
//! configuration into an [`Element`] tree (named attributes plus ordered child
//! elements), and whatever hosts the engine maps that tree onto its own project
//! format. With the `serde` feature the tree can be serialised directly.

use std::{fmt::Display, str::FromStr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::LoadError;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Fail unless the element carries the expected tag.
    pub fn expect_tag(&self, tag: &str) -> Result<(), LoadError> {
        if self.tag == tag {
            Ok(())
        } else {
            Err(LoadError::unexpected(tag, &self.tag))
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set (or replace) an attribute.
    pub fn set_attr(&mut self, name: &str, value: impl Display) -> &mut Self {
        let value = value.to_string();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
        self
    }

    pub fn with_attr(mut self, name: &str, value: impl Display) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Parse an attribute, `None` when absent.
    pub fn get<T: FromStr>(&self, name: &str) -> Result<Option<T>, LoadError> {
        match self.attr(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| LoadError::InvalidValue {
                    element: self.tag.clone(),
                    attr: name.to_string(),
                    value: raw.to_string(),
                }),
        }
    }

    /// Parse an attribute, falling back to `default` when absent.
    pub fn get_or<T: FromStr>(&self, name: &str, default: T) -> Result<T, LoadError> {
        Ok(self.get(name)?.unwrap_or(default))
    }

    /// Parse a required attribute.
    pub fn require<T: FromStr>(&self, name: &str) -> Result<T, LoadError> {
        self.get(name)?
            .ok_or_else(|| LoadError::missing(&self.tag, name))
    }

    /// Boolean attributes are stored as 0/1; "true"/"false" are accepted too.
    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool, LoadError> {
        match self.attr(name).map(str::trim) {
            None => Ok(default),
            Some("1") | Some("true") => Ok(true),
            Some("0") | Some("false") => Ok(false),
            Some(raw) => Err(LoadError::InvalidValue {
                element: self.tag.clone(),
                attr: name.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    pub fn set_bool(&mut self, name: &str, value: bool) -> &mut Self {
        self.set_attr(name, u8::from(value))
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// Append a child and return it for further editing.
    pub fn add_child(&mut self, child: Element) -> &mut Element {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_replace_in_place() {
        let mut el = Element::new("osc");
        el.set_attr("frq", 440.0).set_attr("wt", 1);
        el.set_attr("frq", 220.5);
        assert_eq!(el.attr("frq"), Some("220.5"));
        assert_eq!(el.attrs().count(), 2);
    }

    #[test]
    fn typed_getters() {
        let el = Element::new("env").with_attr("rate", "0.25").with_attr("on", 1);
        assert_eq!(el.require::<f32>("rate").unwrap(), 0.25);
        assert_eq!(el.get_or::<f32>("level", 1.0).unwrap(), 1.0);
        assert!(el.get_bool("on", false).unwrap());
        assert!(matches!(
            el.require::<f32>("level"),
            Err(LoadError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn invalid_value_reports_attribute() {
        let el = Element::new("env").with_attr("rate", "fast");
        let err = el.get::<f32>("rate").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value 'fast' for attribute 'rate' on <env>"
        );
    }

    #[test]
    fn children_keep_order() {
        let mut el = Element::new("instr");
        el.add_child(Element::new("part").with_attr("n", 0));
        el.add_child(Element::new("lfo"));
        el.add_child(Element::new("part").with_attr("n", 1));
        let parts: Vec<u32> = el
            .children_named("part")
            .map(|p| p.require("n").unwrap())
            .collect();
        assert_eq!(parts, vec![0, 1]);
        assert_eq!(el.children()[1].tag(), "lfo");
        assert!(el.expect_tag("instr").is_ok());
        assert!(el.expect_tag("lib").is_err());
    }
}
