//! User-supplied op filters applied at the end of step 5: a blacklist of
//! attributes to drop entirely, and a rewrite table transforming `add`
//! values for specific attributes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tlog_common::value::{Keyword, Value};

pub type RewriteFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Clone, Default)]
pub struct ReplayFilters {
    pub blacklist: HashSet<Keyword>,
    pub rewrites: HashMap<Keyword, RewriteFn>,
}

impl ReplayFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blacklist(mut self, attrs: impl IntoIterator<Item = Keyword>) -> Self {
        self.blacklist.extend(attrs);
        self
    }

    pub fn with_rewrite(mut self, attr: Keyword, f: RewriteFn) -> Self {
        self.rewrites.insert(attr, f);
        self
    }

    pub fn is_blacklisted(&self, attr: &Keyword) -> bool {
        self.blacklist.contains(attr)
    }

    pub fn rewrite(&self, attr: &Keyword, value: Value) -> Value {
        match self.rewrites.get(attr) {
            Some(f) => f(value),
            None => value,
        }
    }
}
