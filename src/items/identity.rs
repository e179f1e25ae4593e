//! The identity detector: author signatures to stable indices.
//!
//! The dictionary is either generated from the run's commits — merging
//! identities that share an email, then a name — or loaded from a dictionary
//! file of pipe-separated aliases (one author per line, primary identity
//! first). Unmatched commit authors resolve to the missing-author sentinel.

use std::collections::BTreeMap;
use std::io::BufRead;
use crate::error::{Result, StrataError};
use crate::pipeline::{DEPENDENCY_AUTHOR, Deps, Fact, Facts, PipelineItem};
use crate::status::AUTHOR_MISSING;

/// Provides [`DEPENDENCY_AUTHOR`]: the commit author's index into the
/// identity dictionary.
#[derive(Clone, Debug, Default)]
pub struct IdentityItem {
    by_alias: BTreeMap<String, u32>,
    people: Vec<String>,
}

impl IdentityItem {
    /// The resolved author display names, index-aligned.
    #[must_use]
    pub fn people(&self) -> &[String] {
        &self.people
    }

    fn register(&mut self, alias: String, index: u32) {
        self.by_alias.entry(alias).or_insert(index);
    }

    fn generate(&mut self, facts: &Facts) {
        for commit in &facts.commits {
            let email = commit.author_email.to_lowercase();
            let name = commit.author_name.to_lowercase();
            let known = self
                .by_alias
                .get(&email)
                .or_else(|| self.by_alias.get(&name))
                .copied();
            let index = match known {
                Some(index) => index,
                None => {
                    let index = u32::try_from(self.people.len()).expect("author count fits u32");
                    self.people
                        .push(format!("{} <{}>", commit.author_name, commit.author_email));
                    index
                }
            };
            self.register(email, index);
            self.register(name, index);
        }
    }

    fn load_dict(&mut self, path: &std::path::Path) -> Result<()> {
        let file = std::fs::File::open(path).map_err(|e| StrataError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        for line in std::io::BufReader::new(file).lines() {
            let line = line.map_err(|e| StrataError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut aliases = line.split('|').map(str::trim).filter(|a| !a.is_empty());
            let Some(primary) = aliases.next() else {
                continue;
            };
            let index = u32::try_from(self.people.len()).expect("author count fits u32");
            self.people.push(primary.to_owned());
            self.register(primary.to_lowercase(), index);
            for alias in aliases {
                self.register(alias.to_lowercase(), index);
            }
        }
        Ok(())
    }
}

impl PipelineItem for IdentityItem {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn provides(&self) -> &'static [&'static str] {
        &[DEPENDENCY_AUTHOR]
    }

    fn configure(&mut self, facts: &mut Facts) -> Result<()> {
        if let Some(path) = facts.config.people_dict.clone() {
            self.load_dict(&path)?;
        } else {
            self.generate(facts);
        }
        tracing::debug!(people = self.people.len(), "identity dictionary ready");
        facts.people = self.people.clone();
        Ok(())
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        let commit = deps.commit()?;
        let author = self
            .by_alias
            .get(&commit.author_email.to_lowercase())
            .or_else(|| self.by_alias.get(&commit.author_name.to_lowercase()))
            .copied()
            .unwrap_or(AUTHOR_MISSING);
        deps.insert(DEPENDENCY_AUTHOR, Fact::Author(author));
        Ok(())
    }

    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
        (0..n)
            .map(|_| Box::new(self.as_ref().clone()) as Box<dyn PipelineItem>)
            .collect()
    }
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}
