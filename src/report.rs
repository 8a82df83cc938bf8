// SPDX-License-Identifier: MPL-2.0

//! Build a report as clear as possible as to why dependency solving
//! failed.
//!
//! The builder walks the conflict DAG rooted at the failing
//! incompatibility. Incompatibilities derived more than once become
//! numbered lines that later steps refer back to; everything else is
//! folded into the running narrative.

use rustc_hash::FxHashMap;

use crate::container::ContainerCache;
use crate::internal::incompatibility::Cause;
use crate::internal::store::{IncompId, IncompatibilityStore};
use crate::package::ResolutionNode;
use crate::provider::ContainerProvider;
use crate::term::Term;
use crate::version::Version;
use crate::version_set::VersionSet;

struct ReportLine {
    number: Option<usize>,
    message: String,
}

/// Builds the numbered prose derivation for a failed resolution.
pub(crate) struct DiagnosticReportBuilder<'a, P: ContainerProvider> {
    root: &'a ResolutionNode,
    store: &'a IncompatibilityStore,
    cache: &'a ContainerCache<P>,
    /// How often each incompatibility appears as a conflict cause.
    derivations: FxHashMap<IncompId, usize>,
    /// Line numbers handed out to shared incompatibilities.
    line_numbers: FxHashMap<IncompId, usize>,
    lines: Vec<ReportLine>,
}

impl<'a, P: ContainerProvider> DiagnosticReportBuilder<'a, P> {
    /// Render the failure report for a root cause.
    pub(crate) fn build(
        root: &'a ResolutionNode,
        store: &'a IncompatibilityStore,
        cache: &'a ContainerCache<P>,
        root_cause: IncompId,
    ) -> String {
        let mut builder = Self {
            root,
            store,
            cache,
            derivations: FxHashMap::default(),
            line_numbers: FxHashMap::default(),
            lines: Vec::new(),
        };
        builder.count_derivations(root_cause);
        if builder.store[root_cause].conflict_causes().is_some() {
            builder.visit(root_cause, true);
        } else {
            let message = builder.describe(root_cause);
            builder.record(root_cause, message, false);
        }
        builder.render()
    }

    /// First pass: count, for every incompatibility in the DAG, how often
    /// it appears as a conflict cause. Shared ones get numbered lines.
    fn count_derivations(&mut self, root_cause: IncompId) {
        let mut stack = vec![root_cause];
        while let Some(id) = stack.pop() {
            *self.derivations.entry(id).or_insert(0) += 1;
            if let Some((conflict, other)) = self.store[id].conflict_causes() {
                stack.push(conflict);
                stack.push(other);
            }
        }
    }

    /// Second pass: recursive visit emitting one line per derivation.
    fn visit(&mut self, id: IncompId, is_conclusion: bool) {
        let numbered = is_conclusion || self.derivations.get(&id).copied().unwrap_or(0) > 1;
        let description = self.describe(id);
        let Some((conflict, other)) = self.store[id].conflict_causes() else {
            return;
        };
        let conflict_is_derived = self.store[conflict].conflict_causes().is_some();
        let other_is_derived = self.store[other].conflict_causes().is_some();

        if conflict_is_derived && other_is_derived {
            let conflict_line = self.line_numbers.get(&conflict).copied();
            let other_line = self.line_numbers.get(&other).copied();
            match (conflict_line, other_line) {
                (Some(conflict_line), Some(other_line)) => {
                    let message = format!(
                        "because {} ({conflict_line}) and {} ({other_line}), {description}.",
                        self.describe(conflict),
                        self.describe(other),
                    );
                    self.record(id, message, numbered);
                }
                (Some(line), None) => {
                    self.visit(other, false);
                    let message = format!(
                        "and because {} ({line}), {description}.",
                        self.describe(conflict)
                    );
                    self.record(id, message, numbered);
                }
                (None, Some(line)) => {
                    self.visit(conflict, false);
                    let message = format!(
                        "and because {} ({line}), {description}.",
                        self.describe(other)
                    );
                    self.record(id, message, numbered);
                }
                (None, None) => {
                    let single_line_conflict = self.is_single_line(conflict);
                    let single_line_other = self.is_single_line(other);
                    if single_line_conflict || single_line_other {
                        // One side fits a single line, so no line number
                        // is needed to tie the narrative together.
                        let (first, second) = if single_line_other {
                            (conflict, other)
                        } else {
                            (other, conflict)
                        };
                        self.visit(first, false);
                        self.visit(second, false);
                        self.record(id, format!("thus, {description}."), numbered);
                    } else {
                        // Visit the more complex side as its own numbered
                        // sub-conclusion, then chain the other side.
                        self.visit(conflict, true);
                        self.visit(other, false);
                        let line = self.line_numbers[&conflict];
                        let message = format!(
                            "and because {} ({line}), {description}.",
                            self.describe(conflict)
                        );
                        self.record(id, message, numbered);
                    }
                }
            }
        } else if conflict_is_derived || other_is_derived {
            let (derived, external) = if conflict_is_derived {
                (conflict, other)
            } else {
                (other, conflict)
            };
            if let Some(line) = self.line_numbers.get(&derived).copied() {
                let message = format!(
                    "because {} and {} ({line}), {description}.",
                    self.describe(external),
                    self.describe(derived),
                );
                self.record(id, message, numbered);
            } else if self.is_collapsible(derived) {
                // Collapse through the single intermediate derivation.
                let (cause_conflict, cause_other) = self.store[derived]
                    .conflict_causes()
                    .expect("collapsible implies a conflict");
                let (collapsed_derived, collapsed_external) =
                    if self.store[cause_conflict].conflict_causes().is_some() {
                        (cause_conflict, cause_other)
                    } else {
                        (cause_other, cause_conflict)
                    };
                self.visit(collapsed_derived, false);
                let message = format!(
                    "and because {} and {}, {description}.",
                    self.describe(collapsed_external),
                    self.describe(external),
                );
                self.record(id, message, numbered);
            } else {
                self.visit(derived, false);
                let message = format!(
                    "and because {}, {description}.",
                    self.describe(external)
                );
                self.record(id, message, numbered);
            }
        } else {
            let message = format!(
                "because {} and {}, {description}.",
                self.describe(conflict),
                self.describe(other),
            );
            self.record(id, message, numbered);
        }
    }

    /// Both causes are external: the whole derivation fits one line.
    fn is_single_line(&self, id: IncompId) -> bool {
        match self.store[id].conflict_causes() {
            Some((conflict, other)) => {
                self.store[conflict].conflict_causes().is_none()
                    && self.store[other].conflict_causes().is_none()
            }
            None => false,
        }
    }

    /// A derivation that is used once and has exactly one derived cause
    /// without a line number can be folded into its parent's sentence.
    fn is_collapsible(&self, id: IncompId) -> bool {
        if self.derivations.get(&id).copied().unwrap_or(0) > 1 {
            return false;
        }
        let Some((conflict, other)) = self.store[id].conflict_causes() else {
            return false;
        };
        let conflict_is_derived = self.store[conflict].conflict_causes().is_some();
        let other_is_derived = self.store[other].conflict_causes().is_some();
        if conflict_is_derived == other_is_derived {
            return false;
        }
        let complex = if conflict_is_derived { conflict } else { other };
        !self.line_numbers.contains_key(&complex)
    }

    fn record(&mut self, id: IncompId, message: String, numbered: bool) {
        let mut chars = message.chars();
        let message = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => message,
        };
        if numbered {
            let number = self.line_numbers.len() + 1;
            self.line_numbers.insert(id, number);
            self.lines.push(ReportLine {
                number: Some(number),
                message,
            });
        } else {
            // Introductory lines go in front of the numbered derivation.
            self.lines.insert(
                0,
                ReportLine {
                    number: None,
                    message,
                },
            );
        }
    }

    fn render(&self) -> String {
        let width = self
            .lines
            .iter()
            .filter_map(|line| line.number)
            .max()
            .map(|number| number.to_string().len() + 2)
            .unwrap_or(0);
        self.lines
            .iter()
            .map(|line| match line.number {
                Some(number) if width > 0 => {
                    format!("{:>width$} {}", format!("({number})"), line.message)
                }
                _ if width > 0 => format!("{:width$} {}", "", line.message),
                _ => line.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    // Sentence generation #####################################################

    /// One sentence for an incompatibility, driven by its cause.
    fn describe(&self, id: IncompId) -> String {
        let incompatibility = &self.store[id];
        if incompatibility.is_failure(self.root) {
            return "dependencies could not be resolved".to_string();
        }

        match incompatibility.cause() {
            Cause::Dependency { .. } if incompatibility.terms().len() == 2 => {
                let depender = incompatibility.terms().iter().find(|t| t.is_positive());
                let dependee = incompatibility.terms().iter().find(|t| !t.is_positive());
                if let (Some(depender), Some(dependee)) = (depender, dependee) {
                    return format!(
                        "{} depends on {}",
                        self.describe_term(depender, true),
                        self.describe_term(dependee, false),
                    );
                }
            }
            Cause::NoAvailableVersion => {
                if let [term] = incompatibility.terms() {
                    return format!(
                        "no versions of {} match the requirement {}",
                        term.node(),
                        term.requirement()
                    );
                }
            }
            Cause::IncompatibleToolsVersion { tools_version } => {
                if let [term] = incompatibility.terms() {
                    return format!(
                        "{} contains incompatible tools version ({tools_version})",
                        self.describe_term(term, true)
                    );
                }
            }
            Cause::UnversionedDependency { depender, dependee } => {
                return format!(
                    "package '{}' is required using a stable-version requirement and it depends on local or branch-based package '{}'",
                    depender.package(),
                    dependee.package(),
                );
            }
            Cause::Root | Cause::Dependency { .. } | Cause::Conflict { .. } => {}
        }

        // Generic rendering from the signs of the terms.
        if let [term] = incompatibility.terms() {
            return if term.is_positive() {
                format!("{} cannot be used", self.describe_term(term, false))
            } else {
                format!("{} is required", self.describe_term(term, false))
            };
        }
        if let [first, second] = incompatibility.terms() {
            if first.is_positive() && second.is_positive() {
                return format!(
                    "{} is incompatible with {}",
                    self.describe_term(first, false),
                    self.describe_term(second, false),
                );
            }
        }
        let positive: Vec<String> = incompatibility
            .terms()
            .iter()
            .filter(|term| term.is_positive())
            .map(|term| self.describe_term(term, false))
            .collect();
        let negative: Vec<String> = incompatibility
            .terms()
            .iter()
            .filter(|term| !term.is_positive())
            .map(|term| self.describe_term(term, false))
            .collect();
        match (positive.is_empty(), negative.is_empty()) {
            (false, false) if positive.len() == 1 => {
                format!(
                    "{} practically depends on {}",
                    positive[0],
                    negative.join(" or ")
                )
            }
            (false, false) => {
                format!("if {} then {}", positive.join(" and "), negative.join(" or "))
            }
            (false, true) => format!("one of {} must be true", positive.join(" or ")),
            (true, false) => format!("one of {} must be true", negative.join(" or ")),
            (true, true) => "dependencies could not be resolved".to_string(),
        }
    }

    /// `root`, `'name'`, or `'name' <set>`; ranges optionally normalized
    /// against the known version list.
    fn describe_term(&self, term: &Term, normalize: bool) -> String {
        let node = term.node();
        if node.is_root() {
            return "root".to_string();
        }
        let requirement = if normalize {
            self.normalized(node, term.requirement())
        } else {
            term.requirement().clone()
        };
        if requirement == VersionSet::any() {
            return format!("{node}");
        }
        format!("{node} {requirement}")
    }

    /// Drop range bounds that coincide with the extrema of the known
    /// version list; `'a' 1.0.0..<9.0.0` reads better as `'a'` when no
    /// version outside that range was ever published.
    fn normalized(&self, node: &ResolutionNode, set: &VersionSet) -> VersionSet {
        let Some(container) = self.cache.cached(node.package().identity()) else {
            return set.clone();
        };
        let Some(versions) = container.cached_versions() else {
            return set.clone();
        };
        // The list is newest first.
        let (Some(maximum), Some(minimum)) = (versions.first(), versions.last()) else {
            return set.clone();
        };

        let mut segments = set.segments();
        let first = segments.next();
        if segments.next().is_some() {
            return set.clone();
        }
        let Some((low, high)) = first else {
            return set.clone();
        };
        let drop_low = low <= minimum;
        let drop_high = high.map_or(true, |h| h > maximum);
        match (drop_low, drop_high) {
            (true, true) => VersionSet::any(),
            (true, false) => {
                VersionSet::range(Version::lowest(), high.expect("bounded above").clone())
            }
            (false, true) => VersionSet::higher_than(low.clone()),
            (false, false) => set.clone(),
        }
    }
}
