//! Display names for a batch of certificates

use crate::model::Certificate;

/// Builds one name per `(object id, certificate)`, in input order.
///
/// The base name is the subject common name (or the full subject). Names
/// that collide within the batch get the issuer appended, then the hash
/// prefix, then the object id for copies of the same certificate.
pub fn friendly_names(certificates: &[(&[u8], &Certificate)]) -> Vec<String> {
    let base: Vec<String> = certificates.iter().map(|(_, cert)| base_name(cert)).collect();

    let with_issuer = disambiguate(certificates, &base, |_, cert, name| {
        format!(
            "{name} (issued by {})",
            cert.issuer_common_name().unwrap_or("Unknown")
        )
    });
    let with_hash = disambiguate(certificates, &with_issuer, |_, cert, name| {
        format!("{name} [{}]", &cert.hash()[..8])
    });
    disambiguate(certificates, &with_hash, |id, _, name| {
        format!("{name} #{}", hex::encode(id))
    })
}

/// Rewrites the names that occur more than once.
fn disambiguate(
    certificates: &[(&[u8], &Certificate)],
    names: &[String],
    rename: impl Fn(&[u8], &Certificate, &str) -> String,
) -> Vec<String> {
    certificates
        .iter()
        .zip(names)
        .map(|((id, cert), name)| {
            if count(names, name) > 1 {
                rename(id, cert, name)
            } else {
                name.clone()
            }
        })
        .collect()
}

fn base_name(cert: &Certificate) -> String {
    cert.subject_common_name()
        .map(str::to_string)
        .unwrap_or_else(|| cert.subject().to_string())
}

fn count(names: &[String], name: &str) -> usize {
    names.iter().filter(|n| *n == name).count()
}
