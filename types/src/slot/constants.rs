/// Fixed wager taken from the player on every play.
pub const BET: u64 = 3;

/// Number of play records retained per player (oldest evicted first).
pub const HISTORY_LIMIT: usize = 100;

/// Maximum members a team admits.
pub const MAX_TEAM_MEMBERS: u8 = 10;

/// Setting levels accepted for a player.
pub const MIN_SETTING_LEVEL: u8 = 1;
pub const MAX_SETTING_LEVEL: u8 = 6;

/// Setting level whose probability table backs every unpopulated level.
pub const BASE_SETTING_LEVEL: u8 = 1;

/// Maximum length of a player or team identifier.
pub const MAX_ID_LENGTH: usize = 64;

/// Maximum length of a player or team display name.
pub const MAX_NAME_LENGTH: usize = 32;

/// Maximum length of a team description.
pub const MAX_DESCRIPTION_LENGTH: usize = 256;

/// Default page size for history queries.
pub const DEFAULT_HISTORY_PAGE: usize = 20;

/// Default number of entries in a ranking.
pub const DEFAULT_RANKING_LIMIT: usize = 50;

/// Default and maximum page sizes for team listings.
pub const DEFAULT_TEAM_PAGE: usize = 50;
pub const MAX_TEAM_PAGE: usize = 100;
