//! The four indexes of a project and the invariants tying them together.
//!
//! An [`IndexSet`] maps each [`Category`] (including the aggregate `all`)
//! to its [`IndexRecord`]. Membership changes fan out through
//! [`IndexSet::targets`]: the category index first, then the aggregate,
//! so a file is always added to or removed from both.
//!
//! At quiescent points [`check_invariants`] compares a [`MembershipView`]
//! (what the engine wrote to each index) with the tracked files:
//!
//! - **union**: aggregate members == union of the category members;
//! - **partition**: every tracked content id is in exactly one category
//!   index, the one matching its category, and in the aggregate.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Result, SyncError};
use crate::models::{Category, IndexRecord, TrackedFile};

#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    project_id: i64,
    by_category: BTreeMap<Category, IndexRecord>,
}

impl IndexSet {
    pub fn new(project_id: i64) -> Self {
        Self {
            project_id,
            by_category: BTreeMap::new(),
        }
    }

    /// Build from persisted records. Two records for one category, or a
    /// record of another project, is a consistency error.
    pub fn from_records(project_id: i64, records: Vec<IndexRecord>) -> Result<Self> {
        let mut set = Self::new(project_id);
        for record in records {
            if record.project_id != project_id {
                return Err(SyncError::Consistency(format!(
                    "index {} belongs to project {}, not {}",
                    record.id, record.project_id, project_id
                )));
            }
            if set.by_category.contains_key(&record.category) {
                return Err(SyncError::Consistency(format!(
                    "project {} has more than one {} index",
                    project_id, record.category
                )));
            }
            set.by_category.insert(record.category, record);
        }
        Ok(set)
    }

    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    pub fn get(&self, category: Category) -> Option<&IndexRecord> {
        self.by_category.get(&category)
    }

    pub fn insert(&mut self, record: IndexRecord) {
        self.by_category.insert(record.category, record);
    }

    /// Categories without an index, in creation order.
    pub fn missing(&self) -> Vec<Category> {
        Category::INDEX_ORDER
            .into_iter()
            .filter(|c| !self.by_category.contains_key(c))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Records in binding order (code, markup, config, all).
    pub fn ordered(&self) -> Vec<&IndexRecord> {
        Category::INDEX_ORDER
            .iter()
            .filter_map(|c| self.by_category.get(c))
            .collect()
    }

    /// Indexes a membership change for a file of `category` is applied to:
    /// the category index, then the aggregate index.
    pub fn targets(&self, category: Category) -> Result<[&IndexRecord; 2]> {
        if category.is_aggregate() {
            return Err(SyncError::Consistency(
                "files cannot be classified into the aggregate index".to_string(),
            ));
        }
        let missing = |c: Category| {
            SyncError::Consistency(format!(
                "project {} has no {} index",
                self.project_id, c
            ))
        };
        let primary = self.get(category).ok_or_else(|| missing(category))?;
        let aggregate = self.get(Category::All).ok_or_else(|| missing(Category::All))?;
        Ok([primary, aggregate])
    }
}

/// Content ids held by each index of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipView {
    members: BTreeMap<Category, BTreeSet<String>>,
}

impl MembershipView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_all(&mut self, category: Category, members: BTreeSet<String>) {
        self.members.entry(category).or_default().extend(members);
    }

    pub fn members(&self, category: Category) -> BTreeSet<String> {
        self.members.get(&category).cloned().unwrap_or_default()
    }

    pub fn count(&self, category: Category) -> usize {
        self.members.get(&category).map(|m| m.len()).unwrap_or(0)
    }

    /// Union of the three category indexes.
    pub fn category_union(&self) -> BTreeSet<String> {
        Category::CLASSIFIED
            .iter()
            .flat_map(|c| self.members(*c))
            .collect()
    }
}

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// In a category index but not in the aggregate.
    MissingFromAggregate { content_id: String },
    /// In the aggregate but in no category index.
    OrphanInAggregate { content_id: String },
    /// Member of several category indexes.
    MultipleCategories {
        content_id: String,
        categories: Vec<Category>,
    },
    /// Tracked file whose content id is not in its category index.
    NotInCategoryIndex {
        path: String,
        content_id: String,
        category: Category,
    },
    /// Tracked file whose content id is missing from the aggregate.
    NotInAggregate { path: String, content_id: String },
    /// Index member that no tracked file points to.
    Untracked {
        category: Category,
        content_id: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingFromAggregate { content_id } => {
                write!(f, "{} is in a category index but not in all", content_id)
            }
            Violation::OrphanInAggregate { content_id } => {
                write!(f, "{} is in all but in no category index", content_id)
            }
            Violation::MultipleCategories {
                content_id,
                categories,
            } => {
                let names: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
                write!(f, "{} is in several category indexes: {}", content_id, names.join(", "))
            }
            Violation::NotInCategoryIndex {
                path,
                content_id,
                category,
            } => write!(f, "{} ({}) is missing from the {} index", path, content_id, category),
            Violation::NotInAggregate { path, content_id } => {
                write!(f, "{} ({}) is missing from the all index", path, content_id)
            }
            Violation::Untracked {
                category,
                content_id,
            } => write!(f, "{} index holds untracked member {}", category, content_id),
        }
    }
}

/// Check the union and partition invariants. Returns every violation
/// found; an empty vector means the project is consistent.
pub fn check_invariants(view: &MembershipView, files: &[TrackedFile]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let union = view.category_union();
    let aggregate = view.members(Category::All);

    for content_id in union.difference(&aggregate) {
        violations.push(Violation::MissingFromAggregate {
            content_id: content_id.clone(),
        });
    }
    for content_id in aggregate.difference(&union) {
        violations.push(Violation::OrphanInAggregate {
            content_id: content_id.clone(),
        });
    }

    for content_id in &union {
        let categories: Vec<Category> = Category::CLASSIFIED
            .into_iter()
            .filter(|c| view.members(*c).contains(content_id))
            .collect();
        if categories.len() > 1 {
            violations.push(Violation::MultipleCategories {
                content_id: content_id.clone(),
                categories,
            });
        }
    }

    let mut tracked: BTreeSet<&str> = BTreeSet::new();
    for file in files {
        tracked.insert(file.content_id.as_str());
        if !view.members(file.category).contains(&file.content_id) {
            violations.push(Violation::NotInCategoryIndex {
                path: file.path.clone(),
                content_id: file.content_id.clone(),
                category: file.category,
            });
        }
        if !aggregate.contains(&file.content_id) {
            violations.push(Violation::NotInAggregate {
                path: file.path.clone(),
                content_id: file.content_id.clone(),
            });
        }
    }

    for category in Category::INDEX_ORDER {
        for content_id in view.members(category) {
            if !tracked.contains(content_id.as_str()) {
                violations.push(Violation::Untracked {
                    category,
                    content_id,
                });
            }
        }
    }

    violations
}
