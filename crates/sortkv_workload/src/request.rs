use rand::Rng;
use sortkv_store::rpc::{KeyRequest, MultiValuesResponse, SingleValuesResponse};
use sortkv_store::LookupService;

/// Rate of the exponential used for per-request key counts (mean 10).
const KEY_COUNT_LAMBDA: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LookupKind {
    Single,
    Multi,
}

impl LookupKind {
    pub fn metric_name(self) -> &'static str {
        match self {
            LookupKind::Single => "getValuesSingle",
            LookupKind::Multi => "getValuesMulti",
        }
    }
}

/// A generated lookup, sent unchanged to the primary and the shadow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupRequest {
    pub kind: LookupKind,
    pub body: KeyRequest,
}

impl LookupRequest {
    pub async fn send<S>(&self, target: &S) -> anyhow::Result<LookupResponse>
    where
        S: LookupService + ?Sized,
    {
        match self.kind {
            LookupKind::Single => target
                .get_values_single(&self.body)
                .await
                .map(LookupResponse::Single),
            LookupKind::Multi => target
                .get_values_multi(&self.body)
                .await
                .map(LookupResponse::Multi),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupResponse {
    Single(SingleValuesResponse),
    Multi(MultiValuesResponse),
}

impl LookupResponse {
    pub fn found_count(&self) -> u32 {
        match self {
            LookupResponse::Single(resp) => resp.found_count,
            LookupResponse::Multi(resp) => resp.found_count,
        }
    }
}

/// Weighting between the two lookup kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestMix {
    multi_pct: u8,
}

impl RequestMix {
    pub fn new(multi_pct: u8) -> anyhow::Result<Self> {
        anyhow::ensure!(multi_pct <= 100, "multi percentage must be <= 100, got {multi_pct}");
        Ok(Self { multi_pct })
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> LookupKind {
        if rng.gen_range(0..100u8) < self.multi_pct {
            LookupKind::Multi
        } else {
            LookupKind::Single
        }
    }
}

impl Default for RequestMix {
    fn default() -> Self {
        Self { multi_pct: 50 }
    }
}

/// Number of keys for one request: `floor(|Exp(0.1)| + 1)`, never below 1.
pub fn key_count<R: Rng + ?Sized>(rng: &mut R) -> usize {
    let u: f64 = rng.gen();
    let draw = -(1.0 - u).ln() / KEY_COUNT_LAMBDA;
    (draw.abs() + 1.0).floor() as usize
}
