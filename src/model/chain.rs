//! Certificate chains

use crate::model::Certificate;

/// Ordered certificates, subject first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain(Vec<Certificate>);

impl CertificateChain {
    pub fn new(primary: Certificate) -> Self {
        Self(vec![primary])
    }

    pub fn primary(&self) -> &Certificate {
        &self.0[0]
    }

    /// Everything after the subject certificate
    pub fn issuers(&self) -> &[Certificate] {
        &self.0[1..]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.0.iter()
    }

    /// Extends the chain with issuers found in `pool`.
    ///
    /// Stops at a self-signed certificate or when no issuer is available;
    /// never fails.
    pub fn complete(mut self, pool: &[Certificate]) -> Self {
        loop {
            let last = &self.0[self.0.len() - 1];
            if last.is_self_signed() {
                break;
            }
            let next = pool
                .iter()
                .find(|candidate| candidate.is_issuer_of(last) && !self.0.contains(candidate));
            match next {
                Some(issuer) => self.0.push(issuer.clone()),
                None => break,
            }
        }
        self
    }
}
