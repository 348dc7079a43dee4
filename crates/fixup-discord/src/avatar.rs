//! CDN avatar URLs, always PNG at a fixed size.

use fixup_core::domain::{GuildId, UserId};

use crate::types::{AVATAR_SIZE, CDN_BASE};

/// Per-guild member avatar.
pub fn member_avatar_url(guild_id: GuildId, user_id: UserId, hash: &str) -> String {
    format!("{CDN_BASE}/guilds/{guild_id}/users/{user_id}/avatars/{hash}.png?size={AVATAR_SIZE}")
}

/// Account avatar, or the default avatar when the user has none.
pub fn user_avatar_url(user_id: UserId, hash: Option<&str>, discriminator: Option<&str>) -> String {
    match hash {
        Some(hash) => format!("{CDN_BASE}/avatars/{user_id}/{hash}.png?size={AVATAR_SIZE}"),
        None => default_avatar_url(user_id, discriminator),
    }
}

/// Users on the unique-username system (discriminator "0") index by id,
/// legacy users by discriminator.
pub fn default_avatar_url(user_id: UserId, discriminator: Option<&str>) -> String {
    let legacy = discriminator
        .and_then(|d| d.parse::<u64>().ok())
        .filter(|d| *d != 0);
    let index = match legacy {
        Some(d) => d % 5,
        None => (user_id.0 >> 22) % 6,
    };
    format!("{CDN_BASE}/embed/avatars/{index}.png")
}
