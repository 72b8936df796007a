use crate::binary::error::{BinaryError, Result};
use crate::binary::node::Node;
use crate::types::jid::Jid;

/// Attribute accessor that accumulates parse errors instead of failing on
/// the first one; callers check `finish()` once.
pub struct AttrParser<'a> {
    node: &'a Node,
    pub errors: Vec<BinaryError>,
}

impl<'a> AttrParser<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self {
            node,
            errors: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&self) -> Result<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(BinaryError::AttrList(self.errors.clone()))
        }
    }

    fn get_raw(&mut self, key: &str, require: bool) -> Option<&'a str> {
        let val = self.node.attrs.get(key).map(|s| s.as_str());
        if require && val.is_none() {
            self.errors.push(BinaryError::MissingAttr(key.to_string()));
        }
        val
    }

    pub fn optional_string(&mut self, key: &str) -> Option<&'a str> {
        self.get_raw(key, false)
    }

    pub fn required_string(&mut self, key: &str) -> Result<&'a str> {
        self.optional_string(key)
            .ok_or_else(|| BinaryError::MissingAttr(key.to_string()))
    }

    pub fn string(&mut self, key: &str) -> String {
        self.get_raw(key, true).unwrap_or_default().to_string()
    }

    pub fn optional_jid(&mut self, key: &str) -> Option<Jid> {
        let raw = self.get_raw(key, false)?;
        match raw.parse::<Jid>() {
            Ok(jid) => Some(jid),
            Err(e) => {
                self.errors
                    .push(BinaryError::AttrParse(format!("invalid JID '{raw}': {e}")));
                None
            }
        }
    }

    pub fn jid(&mut self, key: &str) -> Jid {
        self.get_raw(key, true);
        self.optional_jid(key).unwrap_or_default()
    }

    pub fn non_ad_jid(&mut self, key: &str) -> Jid {
        self.jid(key).to_non_ad()
    }

    fn parse_with<T, F>(&mut self, key: &str, require: bool, parse: F) -> Option<T>
    where
        F: FnOnce(&str) -> std::result::Result<T, String>,
    {
        let raw = self.get_raw(key, require)?;
        match parse(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "failed to parse '{raw}' for key '{key}': {e}"
                )));
                None
            }
        }
    }

    pub fn optional_u64(&mut self, key: &str) -> Option<u64> {
        self.parse_with(key, false, |s| s.parse().map_err(|e| format!("{e}")))
    }

    pub fn u64(&mut self, key: &str) -> u64 {
        self.parse_with(key, true, |s| s.parse().map_err(|e| format!("{e}")))
            .unwrap_or_default()
    }

    pub fn optional_i64(&mut self, key: &str) -> Option<i64> {
        self.parse_with(key, false, |s| s.parse().map_err(|e| format!("{e}")))
    }

    pub fn optional_bool(&mut self, key: &str) -> bool {
        self.parse_with(key, false, |s| s.parse().map_err(|e| format!("{e}")))
            .unwrap_or(false)
    }

    /// Unix timestamp attribute, defaulting to zero when absent.
    pub fn unix_time(&mut self, key: &str) -> i64 {
        self.optional_i64(key).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use crate::binary::builder::NodeBuilder;

    #[test]
    fn collects_errors_instead_of_failing_fast() {
        let node = NodeBuilder::new("receipt")
            .attr("t", "not-a-number")
            .attr("from", "123@s.whatsapp.net")
            .build();

        let mut parser = node.attrs();
        let from = parser.jid("from");
        let t = parser.optional_u64("t");
        let missing = parser.string("id");

        assert_eq!(from.user, "123");
        assert_eq!(t, None);
        assert_eq!(missing, "");
        assert!(!parser.ok());
        assert_eq!(parser.errors.len(), 2);
        assert!(parser.finish().is_err());
    }

    #[test]
    fn happy_path_has_no_errors() {
        let node = NodeBuilder::new("iq")
            .attr("id", "abc-1")
            .attr("type", "result")
            .build();
        let mut parser = node.attrs();
        assert_eq!(parser.required_string("id").unwrap(), "abc-1");
        assert_eq!(parser.optional_string("type"), Some("result"));
        assert!(parser.finish().is_ok());
    }
}
