use std::fmt;
use std::sync::Arc;

/// Path segments of a request target.
///
/// `/a/b` has the segments `a` and `b`, the root `/` has a single empty
/// segment. Segments are immutable, [`append`] returns a new value sharing
/// every previous segment with `self`.
///
/// [`append`]: Segments::append
#[derive(Clone, Default)]
pub struct Segments {
    last: Option<Arc<Node>>,
}

struct Node {
    value: Box<str>,
    prev: Option<Arc<Node>>,
    len: usize,
}

impl Segments {
    /// Creates an empty sequence.
    pub fn new() -> Self {
        Segments { last: None }
    }

    /// New sequence with `value` after the segments of `self`.
    pub fn append(&self, value: &str) -> Segments {
        let node = Node {
            value: value.into(),
            prev: self.last.clone(),
            len: self.len() + 1,
        };

        Segments {
            last: Some(Arc::new(node)),
        }
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.last.as_ref().map(|n| n.len).unwrap_or(0)
    }

    /// Tells if there are no segments.
    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// The segment at `index`, counting from the start of the path.
    pub fn get(&self, index: usize) -> Option<&str> {
        let len = self.len();
        if index >= len {
            return None;
        }

        let mut skip = len - 1 - index;
        let mut cur = self.last.as_deref();

        while let Some(node) = cur {
            if skip == 0 {
                return Some(&*node.value);
            }
            skip -= 1;
            cur = node.prev.as_deref();
        }

        None
    }

    /// Segments in path order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        let mut all = Vec::with_capacity(self.len());
        let mut cur = self.last.as_deref();
        while let Some(node) = cur {
            all.push(&*node.value);
            cur = node.prev.as_deref();
        }
        all.into_iter().rev()
    }

    /// Compares with a list of expected segments.
    pub fn matches(&self, expected: &[&str]) -> bool {
        self.len() == expected.len() && self.iter().zip(expected).all(|(a, b)| a == *b)
    }
}

impl fmt::Debug for Segments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl fmt::Display for Segments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in self.iter() {
            write!(f, "/{}", s)?;
        }
        Ok(())
    }
}

impl PartialEq for Segments {
    fn eq(&self, other: &Segments) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for Segments {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn append_shares_prefix() {
        let a = Segments::new().append("a");
        let ab = a.append("b");
        let ac = a.append("c");

        assert!(a.matches(&["a"]));
        assert!(ab.matches(&["a", "b"]));
        assert!(ac.matches(&["a", "c"]));

        let prev_b = ab.last.as_ref().unwrap().prev.as_ref().unwrap();
        let prev_c = ac.last.as_ref().unwrap().prev.as_ref().unwrap();
        assert!(Arc::ptr_eq(prev_b, prev_c));
    }

    #[test]
    fn get_and_display() {
        let s = Segments::new().append("x").append("y").append("z");

        assert_eq!(s.len(), 3);
        assert_eq!(s.get(0), Some("x"));
        assert_eq!(s.get(2), Some("z"));
        assert_eq!(s.get(3), None);
        assert_eq!(s.to_string(), "/x/y/z");
        assert_eq!(Segments::new().append("").to_string(), "/");
    }
}
