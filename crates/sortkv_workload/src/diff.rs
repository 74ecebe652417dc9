use sortkv_store::rpc::{MultiValuesResponse, SingleValuesResponse};
use sortkv_store::service::hex_keys;

use crate::metrics::{Counter, Recorder};
use crate::request::{LookupKind, LookupRequest, LookupResponse};

/// Everything needed to triage one mismatch offline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffReport {
    pub request: LookupRequest,
    pub hex_keys: Vec<String>,
    pub primary: LookupResponse,
    pub shadow: LookupResponse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffResult {
    Match,
    Mismatch(Box<DiffReport>),
}

impl DiffResult {
    pub fn is_match(&self) -> bool {
        matches!(self, DiffResult::Match)
    }
}

/// Compares primary and shadow answers to the same request. Mismatches are
/// counted under `diffs.<kind>` and logged; nothing else is affected.
#[derive(Clone, Debug)]
pub struct ResponseDiffer {
    single: Counter,
    multi: Counter,
}

impl ResponseDiffer {
    pub fn new(recorder: &Recorder) -> Self {
        Self {
            single: recorder.counter(&diff_metric(LookupKind::Single)),
            multi: recorder.counter(&diff_metric(LookupKind::Multi)),
        }
    }

    pub fn compare(
        &self,
        request: &LookupRequest,
        primary: &LookupResponse,
        shadow: &LookupResponse,
    ) -> DiffResult {
        if responses_equal(primary, shadow) {
            return DiffResult::Match;
        }
        self.counter(request.kind).inc();

        let report = DiffReport {
            request: request.clone(),
            hex_keys: hex_keys(&request.body.sorted_keys),
            primary: primary.clone(),
            shadow: shadow.clone(),
        };
        tracing::warn!(
            kind = request.kind.metric_name(),
            collection = %request.body.collection,
            keys = ?report.hex_keys,
            primary_found = primary.found_count(),
            shadow_found = shadow.found_count(),
            primary = ?report.primary,
            shadow = ?report.shadow,
            "[DIFF]"
        );
        DiffResult::Mismatch(Box::new(report))
    }

    fn counter(&self, kind: LookupKind) -> &Counter {
        match kind {
            LookupKind::Single => &self.single,
            LookupKind::Multi => &self.multi,
        }
    }
}

pub fn diff_metric(kind: LookupKind) -> String {
    format!("diffs.{}", kind.metric_name())
}

fn responses_equal(a: &LookupResponse, b: &LookupResponse) -> bool {
    match (a, b) {
        (LookupResponse::Single(a), LookupResponse::Single(b)) => single_equal(a, b),
        (LookupResponse::Multi(a), LookupResponse::Multi(b)) => multi_equal(a, b),
        _ => false,
    }
}

fn single_equal(a: &SingleValuesResponse, b: &SingleValuesResponse) -> bool {
    a.found_count == b.found_count && a.values == b.values
}

// Value order inside an entry is significant.
fn multi_equal(a: &MultiValuesResponse, b: &MultiValuesResponse) -> bool {
    a.found_count == b.found_count && a.values == b.values
}
