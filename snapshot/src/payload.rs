//! Namespaced payload model
//!
//! Every piece of application state in a snapshot is one `Payload`. The
//! set of variants is closed: `to_wire` / `from_wire` are the only place
//! a wire tag is mapped to a variant, and an unknown tag is an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use vellum_core::{BlockHeight, SnapshotError, SnapshotResult};

/// Logical owner of a group of payloads, one per state provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    AppState,
    Epoch,
    Assets,
    Witness,
    Governance,
    Banking,
    Collateral,
    Notary,
    NetParams,
    Checkpoint,
    Delegation,
    Execution,
    Matching,
    Positions,
    Staking,
    Spam,
    Limits,
    Rewards,
    EventForwarder,
    ProofOfWork,
    ProtocolUpgrade,
}

impl Namespace {
    /// Order in which namespaces are handed back to their providers on
    /// restore. Markets must exist before their books and positions.
    pub const RESTORE_ORDER: [Namespace; 21] = [
        Namespace::AppState,
        Namespace::Epoch,
        Namespace::Assets,
        Namespace::Witness,
        Namespace::Governance,
        Namespace::Banking,
        Namespace::Collateral,
        Namespace::Notary,
        Namespace::NetParams,
        Namespace::Checkpoint,
        Namespace::Delegation,
        Namespace::Execution,
        Namespace::Matching,
        Namespace::Positions,
        Namespace::Staking,
        Namespace::Spam,
        Namespace::Limits,
        Namespace::Rewards,
        Namespace::EventForwarder,
        Namespace::ProofOfWork,
        Namespace::ProtocolUpgrade,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::AppState => "app",
            Namespace::Epoch => "epoch",
            Namespace::Assets => "assets",
            Namespace::Witness => "witness",
            Namespace::Governance => "governance",
            Namespace::Banking => "banking",
            Namespace::Collateral => "collateral",
            Namespace::Notary => "notary",
            Namespace::NetParams => "netparams",
            Namespace::Checkpoint => "checkpoint",
            Namespace::Delegation => "delegation",
            Namespace::Execution => "execution",
            Namespace::Matching => "matching",
            Namespace::Positions => "positions",
            Namespace::Staking => "staking",
            Namespace::Spam => "spam",
            Namespace::Limits => "limits",
            Namespace::Rewards => "rewards",
            Namespace::EventForwarder => "eventforwarder",
            Namespace::ProofOfWork => "pow",
            Namespace::ProtocolUpgrade => "protocolupgrade",
        }
    }

    /// Tree key addressing `key` inside this namespace
    pub fn tree_key(&self, key: &str) -> String {
        format!("{}.{}", self.as_str(), key)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::RESTORE_ORDER
            .iter()
            .copied()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| SnapshotError::UnknownNamespaceName(s.to_string()))
    }
}

// ============ Payload bodies ============

/// Block-level facts the snapshot engine records itself
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppState {
    pub height: BlockHeight,
    pub block: String,
    /// Block time in nanoseconds since the Unix epoch
    pub time: i64,
    pub chain_id: String,
    pub protocol_version: String,
    pub protocol_upgrade: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EpochState {
    pub seq: u64,
    pub start_time: i64,
    pub expire_time: i64,
    pub ready_to_start_new_epoch: bool,
    pub ready_to_end_epoch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub decimals: u32,
    pub quantum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Assets {
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessResource {
    pub id: String,
    pub check_until: i64,
    pub votes: Vec<String>,
    pub state: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Witness {
    pub resources: Vec<WitnessResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub party: String,
    pub state: u32,
    pub terms: Vec<u8>,
    pub yes: Vec<String>,
    pub no: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Proposals {
    pub proposals: Vec<Proposal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub reference: String,
    pub party: String,
    pub asset: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transfers {
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeenRefs {
    pub refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub party: String,
    pub asset: String,
    pub market: String,
    pub balance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Accounts {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarySig {
    pub id: String,
    pub kind: u32,
    pub node: String,
    pub sig: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Notary {
    pub sigs: Vec<NotarySig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetParams {
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub next_cp: i64,
    pub state: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub party: String,
    pub node_id: String,
    pub amount: String,
    pub epoch_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Delegations {
    pub delegations: Vec<Delegation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub trading_mode: u32,
    pub last_traded_price: String,
    pub config: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionMarkets {
    pub markets: Vec<Market>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub party: String,
    pub price: String,
    pub size: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchingBook {
    pub market_id: String,
    pub buy: Vec<Order>,
    pub sell: Vec<Order>,
    pub last_traded_price: String,
    pub batch_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub party: String,
    pub size: i64,
    pub buy: i64,
    pub sell: i64,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarketPositions {
    pub market_id: String,
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingAccount {
    pub party: String,
    pub balance: String,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StakingAccounts {
    pub accounts: Vec<StakingAccount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpamPolicy {
    pub epoch_seq: u64,
    pub party_rejections: BTreeMap<String, u64>,
    pub banned_until: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LimitState {
    pub block_count: u32,
    pub can_propose_market: bool,
    pub can_propose_asset: bool,
    pub genesis_loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub from_account: String,
    pub asset: String,
    pub party_amounts: BTreeMap<String, String>,
    pub epoch_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PendingPayouts {
    pub payouts: Vec<Payout>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventForwarder {
    pub acked_events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProofOfWork {
    pub block_height: Vec<u64>,
    pub block_hash: Vec<String>,
    pub seen_tx: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeProposal {
    pub upgrade_block_height: BlockHeight,
    pub release_tag: String,
    pub accepted_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtocolUpgradeProposals {
    pub active: Vec<UpgradeProposal>,
    pub accepted: Vec<String>,
}

// ============ Payload ============

/// One unit of application state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    AppState(AppState),
    Epoch(EpochState),
    ActiveAssets(Assets),
    PendingAssets(Assets),
    Witness(Witness),
    GovernanceActive(Proposals),
    GovernanceEnacted(Proposals),
    BankingWithdrawals(Transfers),
    BankingDeposits(Transfers),
    BankingSeen(SeenRefs),
    CollateralAccounts(Accounts),
    CollateralAssets(Assets),
    Notary(Notary),
    NetParams(NetParams),
    Checkpoint(Checkpoint),
    DelegationActive(Delegations),
    DelegationPending(Delegations),
    ExecutionMarkets(ExecutionMarkets),
    MatchingBook(MatchingBook),
    MarketPositions(MarketPositions),
    StakingAccounts(StakingAccounts),
    SpamPolicy(SpamPolicy),
    LimitState(LimitState),
    RewardsPendingPayouts(PendingPayouts),
    EventForwarder(EventForwarder),
    ProofOfWork(ProofOfWork),
    ProtocolUpgrade(ProtocolUpgradeProposals),
}

#[derive(Serialize, Deserialize)]
struct WirePayload {
    tag: u16,
    body: Vec<u8>,
}

impl Payload {
    pub fn namespace(&self) -> Namespace {
        match self {
            Payload::AppState(_) => Namespace::AppState,
            Payload::Epoch(_) => Namespace::Epoch,
            Payload::ActiveAssets(_) | Payload::PendingAssets(_) => Namespace::Assets,
            Payload::Witness(_) => Namespace::Witness,
            Payload::GovernanceActive(_) | Payload::GovernanceEnacted(_) => Namespace::Governance,
            Payload::BankingWithdrawals(_) | Payload::BankingDeposits(_) | Payload::BankingSeen(_) => {
                Namespace::Banking
            }
            Payload::CollateralAccounts(_) | Payload::CollateralAssets(_) => Namespace::Collateral,
            Payload::Notary(_) => Namespace::Notary,
            Payload::NetParams(_) => Namespace::NetParams,
            Payload::Checkpoint(_) => Namespace::Checkpoint,
            Payload::DelegationActive(_) | Payload::DelegationPending(_) => Namespace::Delegation,
            Payload::ExecutionMarkets(_) => Namespace::Execution,
            Payload::MatchingBook(_) => Namespace::Matching,
            Payload::MarketPositions(_) => Namespace::Positions,
            Payload::StakingAccounts(_) => Namespace::Staking,
            Payload::SpamPolicy(_) => Namespace::Spam,
            Payload::LimitState(_) => Namespace::Limits,
            Payload::RewardsPendingPayouts(_) => Namespace::Rewards,
            Payload::EventForwarder(_) => Namespace::EventForwarder,
            Payload::ProofOfWork(_) => Namespace::ProofOfWork,
            Payload::ProtocolUpgrade(_) => Namespace::ProtocolUpgrade,
        }
    }

    /// Key of the payload inside its namespace
    pub fn key(&self) -> String {
        let key = match self {
            Payload::MatchingBook(book) => return book.market_id.clone(),
            Payload::MarketPositions(positions) => return positions.market_id.clone(),
            Payload::ActiveAssets(_) | Payload::DelegationActive(_) | Payload::GovernanceActive(_) => "active",
            Payload::PendingAssets(_) | Payload::DelegationPending(_) => "pending",
            Payload::GovernanceEnacted(_) => "enacted",
            Payload::BankingWithdrawals(_) => "withdrawals",
            Payload::BankingDeposits(_) => "deposits",
            Payload::BankingSeen(_) => "seen",
            Payload::CollateralAccounts(_) | Payload::StakingAccounts(_) => "accounts",
            Payload::CollateralAssets(_) => "assets",
            Payload::ExecutionMarkets(_) => "markets",
            Payload::SpamPolicy(_) => "voteSpamPolicy",
            Payload::RewardsPendingPayouts(_) => "pendingPayout",
            Payload::AppState(_)
            | Payload::Epoch(_)
            | Payload::Witness(_)
            | Payload::Notary(_)
            | Payload::NetParams(_)
            | Payload::Checkpoint(_)
            | Payload::LimitState(_)
            | Payload::EventForwarder(_)
            | Payload::ProofOfWork(_)
            | Payload::ProtocolUpgrade(_) => "all",
        };
        key.to_string()
    }

    /// `"{namespace}.{key}"`, the address of this payload in the state tree
    pub fn tree_key(&self) -> String {
        self.namespace().tree_key(&self.key())
    }

    pub fn app_state(&self) -> Option<&AppState> {
        match self {
            Payload::AppState(state) => Some(state),
            _ => None,
        }
    }

    /// Encode to the tagged wire form
    pub fn to_wire(&self) -> SnapshotResult<Vec<u8>> {
        let (tag, body) = match self {
            Payload::AppState(b) => (1, bincode::serialize(b)?),
            Payload::Epoch(b) => (2, bincode::serialize(b)?),
            Payload::ActiveAssets(b) => (3, bincode::serialize(b)?),
            Payload::PendingAssets(b) => (4, bincode::serialize(b)?),
            Payload::Witness(b) => (5, bincode::serialize(b)?),
            Payload::GovernanceActive(b) => (6, bincode::serialize(b)?),
            Payload::GovernanceEnacted(b) => (7, bincode::serialize(b)?),
            Payload::BankingWithdrawals(b) => (8, bincode::serialize(b)?),
            Payload::BankingDeposits(b) => (9, bincode::serialize(b)?),
            Payload::BankingSeen(b) => (10, bincode::serialize(b)?),
            Payload::CollateralAccounts(b) => (11, bincode::serialize(b)?),
            Payload::CollateralAssets(b) => (12, bincode::serialize(b)?),
            Payload::Notary(b) => (13, bincode::serialize(b)?),
            Payload::NetParams(b) => (14, bincode::serialize(b)?),
            Payload::Checkpoint(b) => (15, bincode::serialize(b)?),
            Payload::DelegationActive(b) => (16, bincode::serialize(b)?),
            Payload::DelegationPending(b) => (17, bincode::serialize(b)?),
            Payload::ExecutionMarkets(b) => (18, bincode::serialize(b)?),
            Payload::MatchingBook(b) => (19, bincode::serialize(b)?),
            Payload::MarketPositions(b) => (20, bincode::serialize(b)?),
            Payload::StakingAccounts(b) => (21, bincode::serialize(b)?),
            Payload::SpamPolicy(b) => (22, bincode::serialize(b)?),
            Payload::LimitState(b) => (23, bincode::serialize(b)?),
            Payload::RewardsPendingPayouts(b) => (24, bincode::serialize(b)?),
            Payload::EventForwarder(b) => (25, bincode::serialize(b)?),
            Payload::ProofOfWork(b) => (26, bincode::serialize(b)?),
            Payload::ProtocolUpgrade(b) => (27, bincode::serialize(b)?),
        };
        Ok(bincode::serialize(&WirePayload { tag, body })?)
    }

    /// Decode from the tagged wire form
    pub fn from_wire(bytes: &[u8]) -> SnapshotResult<Payload> {
        let wire: WirePayload = bincode::deserialize(bytes)?;
        let body = wire.body.as_slice();
        let payload = match wire.tag {
            1 => Payload::AppState(bincode::deserialize(body)?),
            2 => Payload::Epoch(bincode::deserialize(body)?),
            3 => Payload::ActiveAssets(bincode::deserialize(body)?),
            4 => Payload::PendingAssets(bincode::deserialize(body)?),
            5 => Payload::Witness(bincode::deserialize(body)?),
            6 => Payload::GovernanceActive(bincode::deserialize(body)?),
            7 => Payload::GovernanceEnacted(bincode::deserialize(body)?),
            8 => Payload::BankingWithdrawals(bincode::deserialize(body)?),
            9 => Payload::BankingDeposits(bincode::deserialize(body)?),
            10 => Payload::BankingSeen(bincode::deserialize(body)?),
            11 => Payload::CollateralAccounts(bincode::deserialize(body)?),
            12 => Payload::CollateralAssets(bincode::deserialize(body)?),
            13 => Payload::Notary(bincode::deserialize(body)?),
            14 => Payload::NetParams(bincode::deserialize(body)?),
            15 => Payload::Checkpoint(bincode::deserialize(body)?),
            16 => Payload::DelegationActive(bincode::deserialize(body)?),
            17 => Payload::DelegationPending(bincode::deserialize(body)?),
            18 => Payload::ExecutionMarkets(bincode::deserialize(body)?),
            19 => Payload::MatchingBook(bincode::deserialize(body)?),
            20 => Payload::MarketPositions(bincode::deserialize(body)?),
            21 => Payload::StakingAccounts(bincode::deserialize(body)?),
            22 => Payload::SpamPolicy(bincode::deserialize(body)?),
            23 => Payload::LimitState(bincode::deserialize(body)?),
            24 => Payload::RewardsPendingPayouts(bincode::deserialize(body)?),
            25 => Payload::EventForwarder(bincode::deserialize(body)?),
            26 => Payload::ProofOfWork(bincode::deserialize(body)?),
            27 => Payload::ProtocolUpgrade(bincode::deserialize(body)?),
            tag => return Err(SnapshotError::UnknownPayloadKind { tag }),
        };
        Ok(payload)
    }
}
