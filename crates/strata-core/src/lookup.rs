//! Path ownership index.
//!
//! A trie keyed by path segments that answers "which entry owns this path"
//! in time proportional to the depth of the query rather than the number of
//! registered entries. Input is expected to be already normalized: only the
//! configured delimiter separates segments, and empty segments produced by
//! leading, trailing or doubled delimiters are kept as literal `""` keys.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// The default segment delimiter.
pub const DEFAULT_DELIMITER: char = '/';

/// A node of the path trie.
#[derive(Debug, Clone)]
pub struct PathTrieNode<T> {
    value: Option<T>,
    children: Option<HashMap<String, PathTrieNode<T>>>,
}

impl<T> PathTrieNode<T> {
    const fn empty() -> Self {
        Self {
            value: None,
            children: None,
        }
    }

    /// The value registered exactly at this node.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Child nodes keyed by segment.
    pub fn children(&self) -> Option<&HashMap<String, Self>> {
        self.children.as_ref()
    }
}

/// Result of [`LookupByPath::find_longest_prefix_match`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixMatch<'trie, T> {
    /// The entry registered at the matched prefix
    pub value: &'trie T,
    /// Byte index of the first character after the matched prefix
    pub index: usize,
    /// The previous, shorter match, if any
    pub last_match: Option<Box<Self>>,
}

/// Iterator over the segments of a serialized path.
///
/// Yields each segment together with the byte index just past it.
#[derive(Debug, Clone)]
pub struct PathSegments<'path> {
    path: &'path str,
    delimiter: char,
    position: Option<usize>,
}

impl<'path> PathSegments<'path> {
    /// Split `path` on `delimiter`. The empty path has no segments.
    pub fn new(path: &'path str, delimiter: char) -> Self {
        Self {
            path,
            delimiter,
            position: (!path.is_empty()).then_some(0),
        }
    }
}

impl<'path> Iterator for PathSegments<'path> {
    type Item = (&'path str, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.position?;
        let rest = self.path.get(start..)?;
        if let Some(offset) = rest.find(self.delimiter) {
            let end = start + offset;
            self.position = Some(end + self.delimiter.len_utf8());
            let (segment, _) = rest.split_at(offset);
            Some((segment, end))
        } else {
            self.position = None;
            Some((rest, self.path.len()))
        }
    }
}

/// Maps slash-delimited paths to the nearest registered ancestor entry.
#[derive(Debug, Clone)]
pub struct LookupByPath<T> {
    root: PathTrieNode<T>,
    delimiter: char,
    size: usize,
}

impl<T> Default for LookupByPath<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LookupByPath<T> {
    /// Create an empty index using `/` as the delimiter.
    pub const fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    /// Create an empty index using a custom delimiter.
    pub const fn with_delimiter(delimiter: char) -> Self {
        Self {
            root: PathTrieNode::empty(),
            delimiter,
            size: 0,
        }
    }

    /// The delimiter used to split paths.
    pub const fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Number of registered entries.
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Whether no entry is registered.
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Root node, corresponding to the empty path.
    pub const fn tree(&self) -> &PathTrieNode<T> {
        &self.root
    }

    /// Register `value` at `path`, returning the value it replaced.
    pub fn set(&mut self, path: &str, value: T) -> Option<T> {
        let mut node = &mut self.root;
        for (segment, _) in PathSegments::new(path, self.delimiter) {
            node = node
                .children
                .get_or_insert_with(HashMap::new)
                .entry(segment.to_owned())
                .or_insert_with(PathTrieNode::empty);
        }
        let previous = node.value.replace(value);
        if previous.is_none() {
            self.size += 1;
        }
        previous
    }

    /// Remove the entry registered exactly at `path`.
    pub fn remove(&mut self, path: &str) -> Option<T> {
        let delimiter = self.delimiter;
        let mut node = &mut self.root;
        for (segment, _) in PathSegments::new(path, delimiter) {
            node = node.children.as_mut()?.get_mut(segment)?;
        }
        let removed = node.value.take();
        if removed.is_some() {
            self.size -= 1;
        }
        removed
    }

    /// Value of the deepest registered ancestor of `path`, including `path` itself.
    ///
    /// Descends while a child matches the next segment and stops at the first
    /// missing child or at a node without children.
    pub fn get_nearest_parent(&self, path: &str) -> Option<&T> {
        let mut node = &self.root;
        let mut best = node.value.as_ref();
        for (segment, _) in PathSegments::new(path, self.delimiter) {
            let Some(child) = node.children.as_ref().and_then(|children| children.get(segment))
            else {
                break;
            };
            node = child;
            if node.value.is_some() {
                best = node.value.as_ref();
            }
            if node.children.is_none() {
                break;
            }
        }
        best
    }

    /// Like [`Self::get_nearest_parent`], but also reports where the matched prefix ends.
    pub fn find_longest_prefix_match(&self, query: &str) -> Option<PrefixMatch<'_, T>> {
        let mut node = &self.root;
        let mut best = node.value.as_ref().map(|value| PrefixMatch {
            value,
            index: 0,
            last_match: None,
        });
        for (segment, index) in PathSegments::new(query, self.delimiter) {
            let Some(child) = node.children.as_ref().and_then(|children| children.get(segment))
            else {
                break;
            };
            node = child;
            if let Some(value) = node.value.as_ref() {
                best = Some(PrefixMatch {
                    value,
                    index,
                    last_match: best.map(Box::new),
                });
            }
            if node.children.is_none() {
                break;
            }
        }
        best
    }

    /// The entry registered exactly at `path`.
    pub fn get(&self, path: &str) -> Option<&T> {
        self.node_at(path).and_then(|node| node.value.as_ref())
    }

    /// Whether an entry is registered exactly at `path`.
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// The trie node at `path`, if the path exists in the trie.
    pub fn node_at(&self, path: &str) -> Option<&PathTrieNode<T>> {
        let mut node = &self.root;
        for (segment, _) in PathSegments::new(path, self.delimiter) {
            node = node.children.as_ref()?.get(segment)?;
        }
        Some(node)
    }

    /// All registered entries with their paths, sorted by path.
    pub fn entries(&self) -> Vec<(String, &T)> {
        let mut result = Vec::with_capacity(self.size);
        if let Some(value) = self.root.value.as_ref() {
            result.push((String::new(), value));
        }
        let mut stack: Vec<(String, &PathTrieNode<T>)> = self
            .root
            .children
            .iter()
            .flatten()
            .map(|(segment, child)| (segment.clone(), child))
            .collect();
        while let Some((path, node)) = stack.pop() {
            if let Some(value) = node.value.as_ref() {
                result.push((path.clone(), value));
            }
            for (segment, child) in node.children.iter().flatten() {
                stack.push((format!("{path}{}{segment}", self.delimiter), child));
            }
        }
        result.sort_by(|left, right| left.0.cmp(&right.0));
        result
    }

    /// Bucket path-keyed items by the entry that owns each path.
    ///
    /// Items whose path has no registered ancestor are dropped.
    pub fn group_by_child<I, P>(&self, items: I) -> HashMap<T, BTreeMap<String, P>>
    where
        T: Clone + Eq + Hash,
        I: IntoIterator<Item = (String, P)>,
    {
        let mut grouped: HashMap<T, BTreeMap<String, P>> = HashMap::new();
        for (path, item) in items {
            if let Some(owner) = self.get_nearest_parent(&path) {
                grouped.entry(owner.clone()).or_default().insert(path, item);
            }
        }
        grouped
    }
}

impl<T, S: AsRef<str>> FromIterator<(S, T)> for LookupByPath<T> {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        let mut lookup = Self::new();
        for (path, value) in iter {
            lookup.set(path.as_ref(), value);
        }
        lookup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LookupByPath<u32> {
        [("foo", 1), ("bar", 2), ("foo/bar", 4)].into_iter().collect()
    }

    #[test]
    fn test_nearest_parent_scenario() {
        let lookup = sample();
        assert_eq!(lookup.get_nearest_parent("foo/bar/baz"), Some(&4));
        assert_eq!(lookup.get_nearest_parent("bar/baz"), Some(&2));
        assert_eq!(lookup.get_nearest_parent("zzz"), None);
        assert_eq!(lookup.get_nearest_parent("foo"), Some(&1));
        assert_eq!(lookup.get_nearest_parent("foo/baz"), Some(&1));
    }

    #[test]
    fn test_empty_index_matches_nothing() {
        let lookup: LookupByPath<u32> = LookupByPath::new();
        assert_eq!(lookup.get_nearest_parent(""), None);
        assert_eq!(lookup.get_nearest_parent("a/b"), None);
        assert!(lookup.is_empty());
    }

    #[test]
    fn test_empty_segments_are_literal() {
        let mut lookup = LookupByPath::new();
        lookup.set("a", 1);
        lookup.set("a//b", 2);
        assert_eq!(lookup.get_nearest_parent("a/b"), Some(&1));
        assert_eq!(lookup.get_nearest_parent("a//b/c"), Some(&2));
        assert_eq!(lookup.get_nearest_parent("/a"), None);

        let segments: Vec<_> = PathSegments::new("a/", '/').map(|(segment, _)| segment).collect();
        assert_eq!(segments, vec!["a", ""]);
    }

    #[test]
    fn test_backslash_is_not_a_separator() {
        let mut lookup = LookupByPath::new();
        lookup.set("foo", 1);
        assert_eq!(lookup.get_nearest_parent("foo\\bar"), None);
    }

    #[test]
    fn test_longest_prefix_match_reports_index() {
        let lookup = sample();
        let Some(found) = lookup.find_longest_prefix_match("foo/bar/baz") else {
            panic!("expected a match");
        };
        assert_eq!(*found.value, 4);
        assert_eq!(found.index, 7);
        let Some(previous) = found.last_match else {
            panic!("expected a shorter match");
        };
        assert_eq!(*previous.value, 1);
        assert_eq!(previous.index, 3);
    }

    #[test]
    fn test_exact_get_set_and_remove() {
        let mut lookup = sample();
        assert_eq!(lookup.len(), 3);
        assert!(lookup.has("foo/bar"));
        assert!(!lookup.has("foo/bar/baz"));
        assert_eq!(lookup.set("foo", 10), Some(1));
        assert_eq!(lookup.len(), 3);
        assert_eq!(lookup.remove("foo"), Some(10));
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.get_nearest_parent("foo/baz"), None);
        assert_eq!(lookup.get_nearest_parent("foo/bar/baz"), Some(&4));
    }

    #[test]
    fn test_group_by_child() {
        let lookup = sample();
        let grouped = lookup.group_by_child([
            ("foo/a.txt".to_owned(), 'a'),
            ("foo/bar/b.txt".to_owned(), 'b'),
            ("other/c.txt".to_owned(), 'c'),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped.get(&1).map(BTreeMap::len), Some(1));
        assert_eq!(grouped.get(&4).map(BTreeMap::len), Some(1));
    }

    #[test]
    fn test_entries_are_sorted() {
        let lookup = sample();
        let paths: Vec<String> = lookup.entries().into_iter().map(|(path, _)| path).collect();
        assert_eq!(paths, vec!["bar", "foo", "foo/bar"]);
    }
}
