//! Node and function-class filters
//!
//! Frames are filtered on their CANopen node-id (the low 7 bits of the
//! identifier, so identifiers sharing a node-id share a switch) and on a
//! handful of function classes that can be hidden wholesale.
//!
//! # File format
//!
//! One record per line, `<hex-id>,<T|F>`. Loading keeps only the low 7 bits
//! of the id and replaces the whole node map; lines that don't parse are
//! skipped.

use crate::canopen::FunctionClass;
use crate::types::{EngineError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Per-node switches plus function-class toggles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    /// node-id → shown
    by_node: BTreeMap<u8, bool>,
    /// Indexed by [`FunctionClass::index`]; true = hidden
    hidden_classes: [bool; 5],
}

fn node_key(id: u32) -> u8 {
    (id & 0x7F) as u8
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of node entries
    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.by_node.contains_key(&node_key(id))
    }

    /// Switch state for the node of `id`, `None` if never seen
    pub fn get(&self, id: u32) -> Option<bool> {
        self.by_node.get(&node_key(id)).copied()
    }

    /// Iterate over `(node-id, shown)` in key order
    pub fn iter(&self) -> impl Iterator<Item = (u8, bool)> + '_ {
        self.by_node.iter().map(|(k, v)| (*k, *v))
    }

    /// Set the switch for an existing node. Unknown nodes are left alone;
    /// returns whether an entry was updated.
    pub fn set(&mut self, id: u32, shown: bool) -> bool {
        match self.by_node.get_mut(&node_key(id)) {
            Some(state) => {
                *state = shown;
                true
            }
            None => false,
        }
    }

    /// Insert or overwrite the switch for a node
    pub fn insert(&mut self, id: u32, shown: bool) {
        self.by_node.insert(node_key(id), shown);
    }

    pub fn set_all(&mut self, shown: bool) {
        for state in self.by_node.values_mut() {
            *state = shown;
        }
    }

    pub fn clear(&mut self) {
        self.by_node.clear();
    }

    pub fn any_enabled(&self) -> bool {
        self.by_node.values().any(|shown| *shown)
    }

    pub fn any_disabled(&self) -> bool {
        self.by_node.values().any(|shown| !*shown)
    }

    /// Make sure the node of `id` has an entry. New entries start shown
    /// unless the user has already disabled something, in which case they
    /// start hidden. Returns true if an entry was created.
    pub fn ensure_node(&mut self, id: u32) -> bool {
        let key = node_key(id);
        if self.by_node.contains_key(&key) {
            return false;
        }
        let shown = !self.any_disabled();
        self.by_node.insert(key, shown);
        true
    }

    pub fn set_class_hidden(&mut self, class: FunctionClass, hidden: bool) {
        self.hidden_classes[class.index()] = hidden;
    }

    pub fn is_class_hidden(&self, class: FunctionClass) -> bool {
        self.hidden_classes[class.index()]
    }

    /// False only when `id` belongs to a function class that is hidden
    pub fn function_class_allowed(&self, id: u32) -> bool {
        match FunctionClass::of(id) {
            Some(class) => !self.is_class_hidden(class),
            None => true,
        }
    }

    /// Full predicate: node switch on and function class allowed. Nodes
    /// without an entry are not shown.
    pub fn allows(&self, id: u32) -> bool {
        self.get(id).unwrap_or(false) && self.function_class_allowed(id)
    }

    /// Parse one filter-file line
    pub fn parse_line(line: &str) -> Result<(u8, bool)> {
        let line = line.trim();
        let (id, state) = line
            .split_once(',')
            .ok_or_else(|| EngineError::InvalidFilterLine(line.to_string()))?;

        let id = id.trim();
        let id = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .unwrap_or(id);
        let id = u32::from_str_radix(id, 16)
            .map_err(|_| EngineError::InvalidFilterLine(line.to_string()))?;

        let shown = state.trim().eq_ignore_ascii_case("T");
        Ok((node_key(id), shown))
    }

    /// Parse filter-file contents, skipping bad lines
    pub fn parse(contents: &str) -> Self {
        let mut set = FilterSet::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            match Self::parse_line(line) {
                Ok((node, shown)) => {
                    set.by_node.insert(node, shown);
                }
                Err(e) => log::debug!("Skipping filter line: {}", e),
            }
        }
        set
    }

    /// Render the node map in file format
    pub fn to_file_string(&self) -> String {
        self.by_node
            .iter()
            .map(|(node, shown)| format!("{:x},{}\n", node, if *shown { 'T' } else { 'F' }))
            .collect()
    }

    /// Replace the node map with the contents of a filter file. Function
    /// class toggles are kept.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)?;
        self.by_node = Self::parse(&contents).by_node;
        log::info!("Loaded {} filters from {:?}", self.by_node.len(), path);
        Ok(())
    }

    pub fn save_file(&self, path: &Path) -> Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(self.to_file_string().as_bytes())?;
        file.flush()?;
        log::info!("Saved {} filters to {:?}", self.by_node.len(), path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_rule_for_new_nodes() {
        let mut filters = FilterSet::new();
        assert!(filters.ensure_node(0x181));
        assert_eq!(filters.get(0x01), Some(true));

        filters.set(0x181, false);
        assert!(filters.ensure_node(0x182));
        assert_eq!(filters.get(0x02), Some(false));

        assert!(!filters.ensure_node(0x202));
    }

    #[test]
    fn test_set_ignores_unknown_nodes() {
        let mut filters = FilterSet::new();
        assert!(!filters.set(0x10, true));
        assert!(filters.is_empty());
    }

    #[test]
    fn test_any_enabled_disabled() {
        let mut filters = FilterSet::new();
        assert!(!filters.any_enabled());
        assert!(!filters.any_disabled());
        filters.insert(1, true);
        filters.insert(2, false);
        assert!(filters.any_enabled());
        assert!(filters.any_disabled());
        filters.set_all(true);
        assert!(!filters.any_disabled());
    }

    #[test]
    fn test_function_class_gating() {
        let mut filters = FilterSet::new();
        filters.insert(0x00, true);
        filters.insert(0x05, true);
        assert!(filters.allows(0x080));
        assert!(filters.allows(0x705));

        filters.set_class_hidden(FunctionClass::Sync, true);
        filters.set_class_hidden(FunctionClass::Heartbeat, true);
        assert!(!filters.allows(0x080));
        assert!(!filters.allows(0x705));
        // EMCY shares the function code with SYNC but is its own class
        assert!(filters.allows(0x085));
        assert!(filters.allows(0x185));
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(FilterSet::parse_line("1a,T").unwrap(), (0x1A, true));
        assert_eq!(FilterSet::parse_line("  0x181 , f ").unwrap(), (0x01, false));
        assert!(FilterSet::parse_line("nonsense").is_err());
        assert!(FilterSet::parse_line("zz,T").is_err());
    }

    #[test]
    fn test_parse_skips_bad_lines() {
        let set = FilterSet::parse("1,T\n\ngarbage\n2,F\n");
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1), Some(true));
        assert_eq!(set.get(2), Some(false));
    }

    #[test]
    fn test_file_round_trip() {
        let mut filters = FilterSet::new();
        filters.insert(0x01, true);
        filters.insert(0x7F, false);
        filters.insert(0x22, true);

        let file = NamedTempFile::new().unwrap();
        filters.save_file(file.path()).unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(contents, "1,T\n22,T\n7f,F\n");

        let mut loaded = FilterSet::new();
        loaded.insert(0x33, true);
        loaded.load_file(file.path()).unwrap();
        assert_eq!(loaded, filters);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let mut filters = FilterSet::new();
        filters.insert(3, true);
        assert!(filters.load_file(Path::new("/nonexistent/filters.txt")).is_err());
        assert_eq!(filters.len(), 1);
    }
}
