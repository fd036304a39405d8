use super::{
    optional_string_encode_size, read_optional_string, read_string, string_encode_size,
    write_optional_string, write_string, BonusKind, Outcome, HISTORY_LIMIT, MAX_DESCRIPTION_LENGTH,
    MAX_ID_LENGTH, MAX_NAME_LENGTH, MAX_SETTING_LEVEL, MAX_TEAM_MEMBERS, MIN_SETTING_LEVEL,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateInvariantError {
    #[error("identifier too long (len={len}, max={max})")]
    IdTooLong { len: usize, max: usize },
    #[error("name too long (len={len}, max={max})")]
    NameTooLong { len: usize, max: usize },
    #[error("setting level out of range (got={got})")]
    SettingOutOfRange { got: u8 },
    #[error("history too long (len={len}, max={max})")]
    HistoryTooLong { len: usize, max: usize },
    #[error("team has too many members (len={len}, max={max})")]
    TooManyMembers { len: usize, max: u8 },
    #[error("team owner {owner} is not a member")]
    OwnerNotMember { owner: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("balance overflow applying delta {delta} to total {total}")]
pub struct BalanceOverflow {
    pub total: i64,
    pub delta: i64,
}

/// All-time and period net balance of one aggregate.
///
/// `total` moves only by play deltas. `period` moves identically until an explicit reset
/// zeroes it and stamps `period_started_at` (milliseconds since the Unix epoch).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub total: i64,
    pub period: i64,
    pub period_started_at: u64,
}

impl BalanceSnapshot {
    pub fn new(now: u64) -> Self {
        Self {
            total: 0,
            period: 0,
            period_started_at: now,
        }
    }

    /// Snapshot after applying `delta`, or `None` if either counter would overflow.
    pub fn checked_apply(&self, delta: i64) -> Option<Self> {
        Some(Self {
            total: self.total.checked_add(delta)?,
            period: self.period.checked_add(delta)?,
            period_started_at: self.period_started_at,
        })
    }

    pub fn apply_delta(&mut self, delta: i64) -> Result<(), BalanceOverflow> {
        *self = self.checked_apply(delta).ok_or(BalanceOverflow {
            total: self.total,
            delta,
        })?;
        Ok(())
    }

    pub fn reset_period(&mut self, now: u64) {
        self.period = 0;
        self.period_started_at = now;
    }
}

impl Write for BalanceSnapshot {
    fn write(&self, writer: &mut impl BufMut) {
        self.total.write(writer);
        self.period.write(writer);
        self.period_started_at.write(writer);
    }
}

impl Read for BalanceSnapshot {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            total: i64::read(reader)?,
            period: i64::read(reader)?,
            period_started_at: u64::read(reader)?,
        })
    }
}

impl EncodeSize for BalanceSnapshot {
    fn encode_size(&self) -> usize {
        self.total.encode_size() + self.period.encode_size() + self.period_started_at.encode_size()
    }
}

/// One retained play of a player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayHistoryEntry {
    /// Player-local, 1-based, contiguous.
    pub sequence: u64,
    pub outcome: Outcome,
    pub payout: u64,
    pub bet: u64,
    pub delta: i64,
    /// Player total after this play.
    pub balance: i64,
    pub is_win: bool,
    pub is_bonus: bool,
    pub timestamp: u64,
}

impl Write for PlayHistoryEntry {
    fn write(&self, writer: &mut impl BufMut) {
        self.sequence.write(writer);
        self.outcome.write(writer);
        self.payout.write(writer);
        self.bet.write(writer);
        self.delta.write(writer);
        self.balance.write(writer);
        self.is_win.write(writer);
        self.is_bonus.write(writer);
        self.timestamp.write(writer);
    }
}

impl Read for PlayHistoryEntry {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            sequence: u64::read(reader)?,
            outcome: Outcome::read(reader)?,
            payout: u64::read(reader)?,
            bet: u64::read(reader)?,
            delta: i64::read(reader)?,
            balance: i64::read(reader)?,
            is_win: bool::read(reader)?,
            is_bonus: bool::read(reader)?,
            timestamp: u64::read(reader)?,
        })
    }
}

impl EncodeSize for PlayHistoryEntry {
    fn encode_size(&self) -> usize {
        self.sequence.encode_size()
            + self.outcome.encode_size()
            + self.payout.encode_size()
            + self.bet.encode_size()
            + self.delta.encode_size()
            + self.balance.encode_size()
            + self.is_win.encode_size()
            + self.is_bonus.encode_size()
            + self.timestamp.encode_size()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAggregate {
    pub player_id: String,
    pub player_name: String,
    pub setting: u8,
    pub play_count: u64,
    pub big_count: u64,
    pub reg_count: u64,
    pub balance: BalanceSnapshot,
    pub team_id: Option<String>,
    /// Chronological, at most `HISTORY_LIMIT` entries.
    pub history: Vec<PlayHistoryEntry>,
    pub created_at: u64,
}

impl PlayerAggregate {
    pub fn new(player_id: String, player_name: String, setting: u8, now: u64) -> Self {
        Self {
            player_id,
            player_name,
            setting,
            play_count: 0,
            big_count: 0,
            reg_count: 0,
            balance: BalanceSnapshot::new(now),
            team_id: None,
            history: Vec::new(),
            created_at: now,
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.play_count + 1
    }

    /// Counts the play, bumps the matching bonus counter and appends the entry, evicting
    /// the oldest entries beyond `HISTORY_LIMIT`. Balance is left to the ledger.
    pub fn record_play(&mut self, entry: PlayHistoryEntry) {
        self.play_count = entry.sequence;
        match entry.outcome.bonus() {
            Some(BonusKind::Big) => self.big_count += 1,
            Some(BonusKind::Reg) => self.reg_count += 1,
            None => {}
        }
        self.history.push(entry);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    pub fn average_delta(&self) -> f64 {
        if self.play_count == 0 {
            return 0.0;
        }
        self.balance.total as f64 / self.play_count as f64
    }

    pub fn validate_invariants(&self) -> Result<(), AggregateInvariantError> {
        check_id(&self.player_id)?;
        check_name(&self.player_name)?;
        if !(MIN_SETTING_LEVEL..=MAX_SETTING_LEVEL).contains(&self.setting) {
            return Err(AggregateInvariantError::SettingOutOfRange { got: self.setting });
        }
        if self.history.len() > HISTORY_LIMIT {
            return Err(AggregateInvariantError::HistoryTooLong {
                len: self.history.len(),
                max: HISTORY_LIMIT,
            });
        }
        Ok(())
    }
}

fn check_id(id: &str) -> Result<(), AggregateInvariantError> {
    if id.len() > MAX_ID_LENGTH {
        return Err(AggregateInvariantError::IdTooLong {
            len: id.len(),
            max: MAX_ID_LENGTH,
        });
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), AggregateInvariantError> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(AggregateInvariantError::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LENGTH,
        });
    }
    Ok(())
}

impl Write for PlayerAggregate {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.player_id, writer);
        write_string(&self.player_name, writer);
        self.setting.write(writer);
        self.play_count.write(writer);
        self.big_count.write(writer);
        self.reg_count.write(writer);
        self.balance.write(writer);
        write_optional_string(self.team_id.as_deref(), writer);
        (self.history.len() as u32).write(writer);
        for entry in &self.history {
            entry.write(writer);
        }
        self.created_at.write(writer);
    }
}

impl Read for PlayerAggregate {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let player_id = read_string(reader, MAX_ID_LENGTH)?;
        let player_name = read_string(reader, MAX_NAME_LENGTH)?;
        let setting = u8::read(reader)?;
        let play_count = u64::read(reader)?;
        let big_count = u64::read(reader)?;
        let reg_count = u64::read(reader)?;
        let balance = BalanceSnapshot::read(reader)?;
        let team_id = read_optional_string(reader, MAX_ID_LENGTH)?;
        let history_len = u32::read(reader)? as usize;
        if history_len > HISTORY_LIMIT {
            return Err(Error::Invalid("PlayerAggregate", "history too long"));
        }
        let mut history = Vec::with_capacity(history_len);
        for _ in 0..history_len {
            history.push(PlayHistoryEntry::read(reader)?);
        }
        let created_at = u64::read(reader)?;
        Ok(Self {
            player_id,
            player_name,
            setting,
            play_count,
            big_count,
            reg_count,
            balance,
            team_id,
            history,
            created_at,
        })
    }
}

impl EncodeSize for PlayerAggregate {
    fn encode_size(&self) -> usize {
        string_encode_size(&self.player_id)
            + string_encode_size(&self.player_name)
            + self.setting.encode_size()
            + self.play_count.encode_size()
            + self.big_count.encode_size()
            + self.reg_count.encode_size()
            + self.balance.encode_size()
            + optional_string_encode_size(self.team_id.as_deref())
            + 4
            + self
                .history
                .iter()
                .map(EncodeSize::encode_size)
                .sum::<usize>()
            + self.created_at.encode_size()
    }
}

/// Team membership and profile. The team balance lives beside it in `TeamAggregate` so
/// membership edits and play deltas never overwrite each other.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamProfile {
    pub team_id: String,
    pub team_name: String,
    pub description: String,
    pub owner_id: String,
    /// Join order; the first remaining member inherits ownership.
    pub members: Vec<String>,
    pub max_members: u8,
    pub is_public: bool,
    pub created_at: u64,
}

impl TeamProfile {
    pub fn new(
        team_id: String,
        team_name: String,
        description: String,
        owner_id: String,
        is_public: bool,
        now: u64,
    ) -> Self {
        Self {
            team_id,
            team_name,
            description,
            members: vec![owner_id.clone()],
            owner_id,
            max_members: MAX_TEAM_MEMBERS,
            is_public,
            created_at: now,
        }
    }

    pub fn is_member(&self, player_id: &str) -> bool {
        self.members.iter().any(|member| member == player_id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members as usize
    }

    pub fn validate_invariants(&self) -> Result<(), AggregateInvariantError> {
        check_id(&self.team_id)?;
        check_name(&self.team_name)?;
        if self.members.len() > self.max_members as usize {
            return Err(AggregateInvariantError::TooManyMembers {
                len: self.members.len(),
                max: self.max_members,
            });
        }
        if !self.is_member(&self.owner_id) {
            return Err(AggregateInvariantError::OwnerNotMember {
                owner: self.owner_id.clone(),
            });
        }
        Ok(())
    }
}

impl Write for TeamProfile {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.team_id, writer);
        write_string(&self.team_name, writer);
        write_string(&self.description, writer);
        write_string(&self.owner_id, writer);
        (self.members.len() as u32).write(writer);
        for member in &self.members {
            write_string(member, writer);
        }
        self.max_members.write(writer);
        self.is_public.write(writer);
        self.created_at.write(writer);
    }
}

impl Read for TeamProfile {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let team_id = read_string(reader, MAX_ID_LENGTH)?;
        let team_name = read_string(reader, MAX_NAME_LENGTH)?;
        let description = read_string(reader, MAX_DESCRIPTION_LENGTH)?;
        let owner_id = read_string(reader, MAX_ID_LENGTH)?;
        let member_count = u32::read(reader)? as usize;
        if member_count > MAX_TEAM_MEMBERS as usize {
            return Err(Error::Invalid("TeamProfile", "too many members"));
        }
        let mut members = Vec::with_capacity(member_count);
        for _ in 0..member_count {
            members.push(read_string(reader, MAX_ID_LENGTH)?);
        }
        Ok(Self {
            team_id,
            team_name,
            description,
            owner_id,
            members,
            max_members: u8::read(reader)?,
            is_public: bool::read(reader)?,
            created_at: u64::read(reader)?,
        })
    }
}

impl EncodeSize for TeamProfile {
    fn encode_size(&self) -> usize {
        string_encode_size(&self.team_id)
            + string_encode_size(&self.team_name)
            + string_encode_size(&self.description)
            + string_encode_size(&self.owner_id)
            + 4
            + self
                .members
                .iter()
                .map(|member| string_encode_size(member))
                .sum::<usize>()
            + self.max_members.encode_size()
            + self.is_public.encode_size()
            + self.created_at.encode_size()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAggregate {
    pub profile: TeamProfile,
    pub balance: BalanceSnapshot,
}

impl TeamAggregate {
    pub fn new(profile: TeamProfile) -> Self {
        let balance = BalanceSnapshot::new(profile.created_at);
        Self { profile, balance }
    }

    pub fn average_delta(&self) -> f64 {
        if self.profile.members.is_empty() {
            return 0.0;
        }
        self.balance.total as f64 / self.profile.members.len() as f64
    }
}

/// Process-wide totals across every player.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalAggregate {
    pub total_players: u64,
    pub total_plays: u64,
    pub total_big: u64,
    pub total_reg: u64,
    pub balance: BalanceSnapshot,
}

impl GlobalAggregate {
    pub fn new(now: u64) -> Self {
        Self {
            balance: BalanceSnapshot::new(now),
            ..Default::default()
        }
    }

    pub fn record_bonus(&mut self, kind: BonusKind) {
        match kind {
            BonusKind::Big => self.total_big += 1,
            BonusKind::Reg => self.total_reg += 1,
        }
    }
}
