//! Failure-domain placement for new replicas
//!
//! Usage is rebuilt from the live replica set on every pass. `select` breaks
//! ties by insertion order: configured domains first, in spec order, then
//! domains first seen on replicas. Whether insertion order is the intended
//! policy (as opposed to random or round-robin) is still open.

/// Usage counters per failure domain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailureDomainStats {
    domains: Vec<(String, u32)>,
}

impl FailureDomainStats {
    /// Track the given domains with zero usage, dropping empty and duplicate ids
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut stats = Self::default();
        for domain in domains {
            let domain = domain.into();
            if !domain.is_empty() && stats.position(&domain).is_none() {
                stats.domains.push((domain, 0));
            }
        }
        stats
    }

    fn position(&self, domain: &str) -> Option<usize> {
        self.domains.iter().position(|(d, _)| d == domain)
    }

    /// Count one replica placed in `domain`
    ///
    /// Unseen domains are appended to the tracked list before being counted.
    pub fn add(&mut self, domain: &str) {
        if domain.is_empty() {
            return;
        }
        match self.position(domain) {
            Some(idx) => self.domains[idx].1 += 1,
            None => self.domains.push((domain.to_string(), 1)),
        }
    }

    /// Least used domain; the first tracked one wins a tie
    pub fn select(&self) -> Option<&str> {
        let mut best: Option<&(String, u32)> = None;
        for entry in &self.domains {
            if best.is_none_or(|b| entry.1 < b.1) {
                best = Some(entry);
            }
        }
        best.map(|(d, _)| d.as_str())
    }

    /// Usage recorded for a domain
    pub fn usage(&self, domain: &str) -> Option<u32> {
        self.position(domain).map(|idx| self.domains[idx].1)
    }

    /// Tracked domains in insertion order
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(|(d, _)| d.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
