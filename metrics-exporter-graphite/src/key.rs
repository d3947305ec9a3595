use std::fmt;

use metrics::Key;

/// A hierarchical metric name.
///
/// Graphite metric paths are dot-separated, and a `KeyPath` models them as a tree: a leaf is a single name, and a node
/// is an ordered sequence of nested key paths. When written out, the tree is flattened depth-first and joined with
/// `.`, so `Node([Leaf("a"), Node([Leaf("b"), Leaf("c")])])` becomes `a.b.c`.
///
/// Numeric names are stringified when the key path is constructed, which means `KeyPath::from(42u64)` and
/// `KeyPath::from("42")` are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPath {
    /// A single name.
    Leaf(String),

    /// An ordered sequence of nested key paths.
    Node(Vec<KeyPath>),
}

impl KeyPath {
    /// Creates a leaf key path from the given name.
    pub fn leaf<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        KeyPath::Leaf(name.into())
    }

    /// Creates a node key path from the given elements.
    pub fn node<I, K>(elements: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyPath>,
    {
        KeyPath::Node(elements.into_iter().map(Into::into).collect())
    }

    /// Flattens the key path into a dot-joined string, without any sanitization.
    pub fn flatten(&self) -> String {
        let mut buf = String::new();
        self.flatten_into(&mut buf);
        buf
    }

    fn flatten_into(&self, buf: &mut String) {
        match self {
            KeyPath::Leaf(name) => buf.push_str(name),
            KeyPath::Node(elements) => {
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        buf.push('.');
                    }
                    element.flatten_into(buf);
                }
            }
        }
    }

    /// Writes the Graphite form of the key path into `buf`.
    ///
    /// The key path is flattened, then every space becomes `_` and every `/` becomes `.`.
    pub(crate) fn write_sanitized(&self, buf: &mut Vec<u8>) {
        match self {
            KeyPath::Leaf(name) => {
                buf.extend(name.bytes().map(|b| match b {
                    b' ' => b'_',
                    b'/' => b'.',
                    b => b,
                }));
            }
            KeyPath::Node(elements) => {
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        buf.push(b'.');
                    }
                    element.write_sanitized(buf);
                }
            }
        }
    }

    /// Returns the Graphite form of the key path.
    ///
    /// See [`KeyPath::flatten`] for how the path is joined. After flattening, every space is replaced with `_` and
    /// every `/` is replaced with `.`, as Graphite paths allow neither.
    pub fn to_graphite_path(&self) -> String {
        let mut buf = Vec::new();
        self.write_sanitized(&mut buf);

        // Only ASCII bytes were substituted, so the buffer is still valid UTF-8.
        String::from_utf8(buf).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flatten())
    }
}

impl From<&str> for KeyPath {
    fn from(name: &str) -> Self {
        KeyPath::Leaf(name.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(name: String) -> Self {
        KeyPath::Leaf(name)
    }
}

impl<K: Into<KeyPath>> From<Vec<K>> for KeyPath {
    fn from(elements: Vec<K>) -> Self {
        KeyPath::node(elements)
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KeyPath {
                fn from(value: $ty) -> Self {
                    KeyPath::Leaf(itoa::Buffer::new().format(value).to_string())
                }
            }
        )*
    };
}

impl_from_integer!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl From<&Key> for KeyPath {
    /// Converts a `metrics` key into a key path.
    ///
    /// A key without labels becomes a leaf of its name. Labels are appended in order as a key leaf followed by a
    /// value leaf, so `requests{method="get"}` becomes `requests.method.get`.
    fn from(key: &Key) -> Self {
        let mut labels = key.labels().peekable();
        if labels.peek().is_none() {
            return KeyPath::leaf(key.name());
        }

        let mut elements = vec![KeyPath::leaf(key.name())];
        for label in labels {
            elements.push(KeyPath::leaf(label.key()));
            elements.push(KeyPath::leaf(label.value()));
        }

        KeyPath::Node(elements)
    }
}
