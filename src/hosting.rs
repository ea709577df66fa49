//! Hosting agreements: time-bounded storage contracts between a client and
//! a host, driven by transfer-completion events on the host side. All cost
//! math is integer-only per the redesign away from floating point at the
//! contract boundary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::error::{ChiralError, ChiralResult};
use crate::signer::Signer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgreementStatus {
    Proposed,
    Accepted,
    Active,
    CancelRequested,
    Cancelled,
    Expired,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingAgreement {
    pub agreement_id: u128,
    pub client_peer_id: String,
    pub client_wallet: String,
    pub host_peer_id: String,
    pub host_wallet: String,
    pub file_fingerprints: Vec<String>,
    pub total_bytes: u64,
    pub duration: Duration,
    pub unit_price_per_mib_per_day: u64,
    pub deposit_reference: Option<String>,
    pub status: AgreementStatus,
    pub proposed_at: SystemTime,
    pub activated_at: Option<SystemTime>,
    pub last_heartbeat_at: Option<SystemTime>,
}

/// Missed heartbeats beyond this duration past the contracted expiry push
/// an `active` agreement to implicit expiry.
pub const T_MISS: Duration = Duration::from_secs(5 * 60);

impl HostingAgreement {
    pub fn propose(
        client_peer_id: String,
        client_wallet: String,
        host_peer_id: String,
        host_wallet: String,
        file_fingerprints: Vec<String>,
        total_bytes: u64,
        duration: Duration,
        unit_price_per_mib_per_day: u64,
        agreement_id: u128,
    ) -> Self {
        HostingAgreement {
            agreement_id,
            client_peer_id,
            client_wallet,
            host_peer_id,
            host_wallet,
            file_fingerprints,
            total_bytes,
            duration,
            unit_price_per_mib_per_day,
            deposit_reference: None,
            status: AgreementStatus::Proposed,
            proposed_at: SystemTime::now(),
            activated_at: None,
            last_heartbeat_at: None,
        }
    }

    /// `cost = ceil(sizeMiB × days × 1000) × unitPricePerMiBPerDay / 1000`,
    /// computed entirely in integer arithmetic.
    pub fn cost(&self) -> u64 {
        let size_mib = (self.total_bytes + (1024 * 1024 - 1)) / (1024 * 1024);
        let days = (self.duration.as_secs() + 86399) / 86400;
        let scaled = size_mib.saturating_mul(days).saturating_mul(1000);
        scaled.saturating_mul(self.unit_price_per_mib_per_day) / 1000
    }

    pub fn accept(&mut self) -> ChiralResult<()> {
        self.transition(AgreementStatus::Proposed, AgreementStatus::Accepted)
    }

    pub fn reject(&mut self) -> ChiralResult<()> {
        self.transition(AgreementStatus::Proposed, AgreementStatus::Rejected)
    }

    /// All files are locally present and a deposit reference is recorded;
    /// the host transitions to `active`.
    pub fn activate(&mut self, deposit_reference: String) -> ChiralResult<()> {
        self.transition(AgreementStatus::Accepted, AgreementStatus::Active)?;
        self.deposit_reference = Some(deposit_reference);
        self.activated_at = Some(SystemTime::now());
        self.last_heartbeat_at = Some(SystemTime::now());
        Ok(())
    }

    pub fn heartbeat(&mut self) -> ChiralResult<()> {
        if self.status != AgreementStatus::Active {
            return Err(ChiralError::ProtocolViolation("heartbeat on a non-active agreement".to_string()));
        }
        self.last_heartbeat_at = Some(SystemTime::now());
        Ok(())
    }

    pub fn request_cancel(&mut self) -> ChiralResult<()> {
        self.transition(AgreementStatus::Active, AgreementStatus::CancelRequested)
    }

    pub fn approve_cancel(&mut self) -> ChiralResult<()> {
        self.transition(AgreementStatus::CancelRequested, AgreementStatus::Cancelled)
    }

    pub fn deny_cancel(&mut self) -> ChiralResult<()> {
        self.transition(AgreementStatus::CancelRequested, AgreementStatus::Active)
    }

    /// Evaluate implicit expiry: missing heartbeats past the contracted
    /// duration plus `T_MISS` grace transitions `active -> expired`.
    pub fn evaluate_expiry(&mut self) {
        if self.status != AgreementStatus::Active {
            return;
        }
        let Some(activated_at) = self.activated_at else { return };
        let Ok(elapsed) = SystemTime::now().duration_since(activated_at) else { return };
        if elapsed < self.duration {
            return;
        }
        let heartbeat_ok = self
            .last_heartbeat_at
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .map(|age| age <= T_MISS)
            .unwrap_or(false);
        if elapsed >= self.duration && !heartbeat_ok {
            self.status = AgreementStatus::Expired;
        } else if elapsed >= self.duration + T_MISS {
            self.status = AgreementStatus::Expired;
        }
    }

    fn transition(&mut self, expected: AgreementStatus, next: AgreementStatus) -> ChiralResult<()> {
        if self.status != expected {
            return Err(ChiralError::ProtocolViolation(format!(
                "cannot move agreement {:#x} from {:?} to {:?}",
                self.agreement_id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// Control-channel message types exchanged while negotiating an agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "hosting_proposal")]
    HostingProposal { agreement_id: u128, file_fingerprints: Vec<String>, total_bytes: u64, signature: Vec<u8> },
    #[serde(rename = "hosting_response")]
    HostingResponse { agreement_id: u128, accepted: bool, signature: Vec<u8> },
    #[serde(rename = "hosting_cancel_request")]
    HostingCancelRequest { agreement_id: u128, signature: Vec<u8> },
    #[serde(rename = "hosting_cancel_response")]
    HostingCancelResponse { agreement_id: u128, approved: bool, signature: Vec<u8> },
}

pub fn sign_proposal(signer: &dyn Signer, agreement: &HostingAgreement) -> ChiralResult<Vec<u8>> {
    let mut payload = agreement.agreement_id.to_be_bytes().to_vec();
    for fp in &agreement.file_fingerprints {
        payload.extend_from_slice(fp.as_bytes());
    }
    payload.extend_from_slice(&agreement.total_bytes.to_be_bytes());
    signer.sign(&payload)
}

/// JSON-file-backed persistence for hosting agreements, one file per
/// agreement under `<store>/agreements/<id>.json`.
pub struct AgreementStore {
    root: PathBuf,
}

impl AgreementStore {
    pub fn new(store_root: PathBuf) -> Self {
        AgreementStore { root: store_root.join("agreements") }
    }

    fn path_for(&self, agreement_id: u128) -> PathBuf {
        self.root.join(format!("{agreement_id}.json"))
    }

    pub async fn save(&self, agreement: &HostingAgreement) -> ChiralResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(agreement.agreement_id);
        let json = serde_json::to_vec_pretty(agreement)
            .map_err(|e| ChiralError::Generic(format!("failed to encode agreement: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn load(&self, agreement_id: u128) -> ChiralResult<HostingAgreement> {
        let path = self.path_for(agreement_id);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ChiralError::NotFound(format!("agreement {agreement_id:#x} not found"))
            } else {
                ChiralError::from(e)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ChiralError::Generic(format!("corrupt agreement record at {path:?}: {e}")))
    }

    /// All agreements currently recorded on disk, in no particular order.
    pub async fn list(&self) -> ChiralResult<Vec<HostingAgreement>> {
        let mut agreements = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(agreements),
            Err(e) => return Err(ChiralError::from(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(bytes) = tokio::fs::read(entry.path()).await {
                if let Ok(agreement) = serde_json::from_slice(&bytes) {
                    agreements.push(agreement);
                }
            }
        }
        Ok(agreements)
    }

    pub async fn delete(&self, agreement_id: u128) -> ChiralResult<bool> {
        match tokio::fs::remove_file(self.path_for(agreement_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChiralError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agreement() -> HostingAgreement {
        HostingAgreement::propose(
            "client".to_string(),
            "0xclient".to_string(),
            "host".to_string(),
            "0xhost".to_string(),
            vec!["fp1".to_string()],
            1024 * 1024,
            Duration::from_secs(86400),
            100,
            0xabcdef,
        )
    }

    #[test]
    fn cost_formula_matches_integer_spec() {
        let agreement = sample_agreement();
        // 1 MiB x 1 day x 100 wei/MiB/day = 100
        assert_eq!(agreement.cost(), 100);
    }

    #[test]
    fn lifecycle_proceeds_proposed_accepted_active() {
        let mut agreement = sample_agreement();
        agreement.accept().unwrap();
        assert_eq!(agreement.status, AgreementStatus::Accepted);
        agreement.activate("0xdead".to_string()).unwrap();
        assert_eq!(agreement.status, AgreementStatus::Active);
        assert!(agreement.deposit_reference.is_some());
    }

    #[test]
    fn cancel_requires_mutual_consent() {
        let mut agreement = sample_agreement();
        agreement.accept().unwrap();
        agreement.activate("0xdead".to_string()).unwrap();
        agreement.request_cancel().unwrap();
        assert_eq!(agreement.status, AgreementStatus::CancelRequested);
        agreement.deny_cancel().unwrap();
        assert_eq!(agreement.status, AgreementStatus::Active);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut agreement = sample_agreement();
        let result = agreement.activate("0xdead".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn expiry_triggers_after_duration_elapses_without_heartbeat() {
        let mut agreement = sample_agreement();
        agreement.accept().unwrap();
        agreement.activate("0xdead".to_string()).unwrap();
        agreement.duration = Duration::from_secs(0);
        agreement.activated_at = Some(SystemTime::now() - Duration::from_secs(10 * 60));
        agreement.last_heartbeat_at = Some(SystemTime::now() - Duration::from_secs(10 * 60));
        agreement.evaluate_expiry();
        assert_eq!(agreement.status, AgreementStatus::Expired);
    }

    #[tokio::test]
    async fn agreement_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgreementStore::new(dir.path().to_path_buf());
        let agreement = sample_agreement();

        store.save(&agreement).await.unwrap();
        let loaded = store.load(agreement.agreement_id).await.unwrap();
        assert_eq!(loaded.agreement_id, agreement.agreement_id);
        assert_eq!(loaded.status, agreement.status);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn agreement_store_persists_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgreementStore::new(dir.path().to_path_buf());
        let mut agreement = sample_agreement();
        store.save(&agreement).await.unwrap();

        agreement.accept().unwrap();
        store.save(&agreement).await.unwrap();

        let loaded = store.load(agreement.agreement_id).await.unwrap();
        assert_eq!(loaded.status, AgreementStatus::Accepted);
    }

    #[tokio::test]
    async fn agreement_store_delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgreementStore::new(dir.path().to_path_buf());
        let agreement = sample_agreement();
        store.save(&agreement).await.unwrap();

        assert!(store.delete(agreement.agreement_id).await.unwrap());
        assert!(matches!(store.load(agreement.agreement_id).await, Err(ChiralError::NotFound(_))));
    }

    #[tokio::test]
    async fn agreement_store_list_is_empty_before_any_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgreementStore::new(dir.path().to_path_buf());
        assert!(store.list().await.unwrap().is_empty());
    }
}
