//! Maps upstream failures onto [`GenerationError`].
//!
//! Provider failures share no common type, so each rule probes the error and
//! its `source()` chain for a shape it recognises. Rules run in order and the
//! first match wins; the last rule matches everything.

use crate::error::GenerationError;
use crate::replicate::UpstreamError;
use std::error::Error as StdError;
use std::io;

pub type ErrorRef<'a> = &'a (dyn StdError + 'static);

pub struct Classifier {
    pub name: &'static str,
    pub classify: fn(ErrorRef<'_>) -> Option<GenerationError>,
}

pub const CLASSIFIERS: &[Classifier] = &[
    Classifier {
        name: "billing",
        classify: billing_required,
    },
    Classifier {
        name: "transport",
        classify: transport_unavailable,
    },
    Classifier {
        name: "fallback",
        classify: unknown,
    },
];

pub fn classify(err: ErrorRef<'_>) -> GenerationError {
    for classifier in CLASSIFIERS {
        if let Some(mapped) = (classifier.classify)(err) {
            log::debug!("Upstream error matched '{}' rule: {}", classifier.name, err);
            return mapped;
        }
    }
    GenerationError::unknown(err.to_string())
}

pub fn billing_required(err: ErrorRef<'_>) -> Option<GenerationError> {
    (http_status(err) == Some(402)).then_some(GenerationError::BillingRequired)
}

pub fn transport_unavailable(err: ErrorRef<'_>) -> Option<GenerationError> {
    let dropped = chain(err)
        .filter_map(|e| e.downcast_ref::<io::Error>())
        .any(|io| {
            matches!(
                io.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
            )
        });
    dropped.then_some(GenerationError::TransportUnavailable)
}

pub fn unknown(err: ErrorRef<'_>) -> Option<GenerationError> {
    Some(GenerationError::unknown(err.to_string()))
}

/// First HTTP status found anywhere in the chain.
pub fn http_status(err: ErrorRef<'_>) -> Option<u16> {
    chain(err).find_map(|e| {
        if let Some(upstream) = e.downcast_ref::<UpstreamError>() {
            return upstream.status();
        }
        e.downcast_ref::<reqwest::Error>()
            .and_then(|r| r.status())
            .map(|s| s.as_u16())
    })
}

fn chain(err: ErrorRef<'_>) -> impl Iterator<Item = ErrorRef<'_>> {
    std::iter::successors(Some(err), |e| (*e).source())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped: {inner}")]
    struct Wrapper {
        #[source]
        inner: UpstreamError,
    }

    fn http(status: u16) -> UpstreamError {
        UpstreamError::Http {
            status,
            body: "{\"detail\":\"nope\"}".into(),
        }
    }

    #[test]
    fn test_billing_rule_alone() {
        assert_eq!(
            billing_required(&http(402)),
            Some(GenerationError::BillingRequired)
        );
        assert_eq!(billing_required(&http(500)), None);
    }

    #[test]
    fn test_billing_found_through_source_chain() {
        let err = Wrapper { inner: http(402) };
        assert_eq!(classify(&err), GenerationError::BillingRequired);
    }

    #[test]
    fn test_transport_rule_alone() {
        let reset = UpstreamError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        let refused = UpstreamError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        let other = UpstreamError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(
            transport_unavailable(&reset),
            Some(GenerationError::TransportUnavailable)
        );
        assert_eq!(
            transport_unavailable(&refused),
            Some(GenerationError::TransportUnavailable)
        );
        assert_eq!(transport_unavailable(&other), None);
    }

    #[test]
    fn test_fallback_uses_description() {
        let err = http(500);
        assert_eq!(
            classify(&err),
            GenerationError::Unknown(err.to_string())
        );
    }

    #[test]
    fn test_order_is_fixed() {
        let names: Vec<_> = CLASSIFIERS.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["billing", "transport", "fallback"]);
    }

    #[test]
    fn test_exact_messages() {
        assert_eq!(
            classify(&http(402)).to_string(),
            "Please wait a few minutes after setting up billing before trying again."
        );
        let reset = UpstreamError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(
            classify(&reset).to_string(),
            "Failed to connect to Replicate API. Please try again."
        );
    }
}
