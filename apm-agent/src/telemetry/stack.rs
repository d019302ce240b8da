/// Names of the currently open transactions, outermost first.
///
/// The innermost (most recently pushed, not yet popped) name is the one new
/// measurements get attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStack {
    names: Vec<String>,
}

impl TransactionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>) {
        self.names.push(name.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.names.pop()
    }

    /// The innermost open transaction, if any.
    pub fn latest(&self) -> Option<&str> {
        self.names.last().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
