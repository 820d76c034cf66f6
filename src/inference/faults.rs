//! Classification of native engine failures by their error text

use once_cell::sync::Lazy;
use regex::RegexSet;

static FAULT_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)segmentation fault",
        r"(?i)\bsig(segv|bus|ill|abrt)\b",
        r"(?i)access violation",
        r"(?i)(memory|heap|stack) corruption",
        r"(?i)corrupted (size|double-linked list)",
        r"(?i)double free",
        r"(?i)illegal (memory access|instruction)",
        r"(?i)invalid pointer",
        r"(?i)stack smashing",
        r"GGML_ASSERT",
    ])
    .expect("fault signatures are valid regexes")
});

static EXHAUSTION_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)out of (device )?memory",
        r"(?i)\boom\b",
        r"(?i)(failed|unable|cannot|could not) (to )?allocate",
        r"(?i)(insufficient|not enough) (device )?(memory|space)",
        r"(?i)bad_alloc",
        r"(?i)cudaMalloc",
        r"(?i)kv cache (is )?full",
        r"(?i)failed to find (a )?(free )?(space|slot) in the kv cache",
    ])
    .expect("exhaustion signatures are valid regexes")
});

/// What a failure message says about the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The handle can no longer be trusted
    Fault,
    /// Memory pressure; the handle is fine and the request can be retried
    ResourceExhausted,
    /// Anything else
    Other,
}

pub fn classify(message: &str) -> FailureClass {
    if FAULT_SIGNATURES.is_match(message) {
        FailureClass::Fault
    } else if EXHAUSTION_SIGNATURES.is_match(message) {
        FailureClass::ResourceExhausted
    } else {
        FailureClass::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_signatures() {
        assert_eq!(classify("Segmentation fault (core dumped)"), FailureClass::Fault);
        assert_eq!(classify("received SIGSEGV in ggml"), FailureClass::Fault);
        assert_eq!(classify("free(): double free detected"), FailureClass::Fault);
        assert_eq!(
            classify("CUDA error: an illegal memory access was encountered"),
            FailureClass::Fault
        );
        assert_eq!(classify("GGML_ASSERT(n_tokens <= n_batch) failed"), FailureClass::Fault);
    }

    #[test]
    fn test_exhaustion_signatures() {
        assert_eq!(classify("CUDA error: out of memory"), FailureClass::ResourceExhausted);
        assert_eq!(
            classify("ggml_backend_cpu_buffer_type_alloc_buffer: failed to allocate buffer"),
            FailureClass::ResourceExhausted
        );
        assert_eq!(classify("std::bad_alloc"), FailureClass::ResourceExhausted);
        assert_eq!(
            classify("decode: failed to find a free slot in the KV cache"),
            FailureClass::ResourceExhausted
        );
    }

    #[test]
    fn test_other_failures() {
        assert_eq!(classify("tokenization failed"), FailureClass::Other);
        assert_eq!(classify("room for improvement"), FailureClass::Other);
    }
}
