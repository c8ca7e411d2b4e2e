use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::{
    audio::{
        notice::EndReason,
        queue::{QueueSnapshot, Track},
    },
    bot::commands::COMMANDS,
    error::MusicError,
};

/// Standard colour palette
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(46, 204, 113);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(155, 89, 182);
    pub const NOW_PLAYING: Colour = Colour::from_rgb(29, 185, 84);
}

/// Footer shared by every embed
const STANDARD_FOOTER: &str = "🎵 Jukebox";

/// Entries shown by the `queue` view
pub const QUEUE_PAGE: usize = 10;

fn track_link(track: &Track) -> String {
    format!("[{}]({})", track.title(), track.url())
}

fn with_thumbnail(embed: CreateEmbed, track: &Track) -> CreateEmbed {
    match track.thumbnail_url() {
        Some(thumbnail) => embed.thumbnail(thumbnail),
        None => embed,
    }
}

/// Embed for the track now playing
pub fn now_playing(track: &Track) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("🎵 Now Playing")
        .description(format!("**{}**", track_link(track)))
        .color(colors::NOW_PLAYING)
        .field("⏱️ Duration", track.duration_label(), true)
        .field("👤 Requested by", track.requested_by(), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    with_thumbnail(embed, track)
}

/// Embed for a track added behind the current one
pub fn track_added(track: &Track, position: usize) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("✅ Added to Queue")
        .description(format!("**{}**", track_link(track)))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duration", track.duration_label(), true)
        .field("📍 Position", format!("#{}", position), true)
        .footer(CreateEmbedFooter::new(format!(
            "Requested by {}",
            track.requested_by()
        )));

    with_thumbnail(embed, track)
}

/// Lines of the queue view: the head marked as playing, then numbered upcoming tracks.
pub fn queue_lines(snapshot: &QueueSnapshot, limit: usize) -> Vec<String> {
    snapshot
        .tracks
        .iter()
        .take(limit)
        .enumerate()
        .map(|(index, track)| {
            let line = format!("{} - `{}`", track_link(track), track.duration_label());
            if index == 0 {
                let marker = if snapshot.is_playing { "🎵 **Now Playing:**" } else { "⏸️ **Paused:**" };
                format!("{} {}", marker, line)
            } else {
                format!("**{}.** {}", index, line)
            }
        })
        .collect()
}

pub fn queue(snapshot: &QueueSnapshot) -> CreateEmbed {
    let total = snapshot.tracks.len();
    let mut footer = format!("Total: {} {}", total, if total == 1 { "song" } else { "songs" });
    if total > QUEUE_PAGE {
        footer.push_str(&format!(" ({} more not shown)", total - QUEUE_PAGE));
    }

    CreateEmbed::default()
        .title("📜 Music Queue")
        .description(queue_lines(snapshot, QUEUE_PAGE).join("\n\n"))
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(footer))
}

pub fn help(prefix: &str) -> CreateEmbed {
    COMMANDS
        .iter()
        .fold(
            CreateEmbed::default()
                .title("🎵 Music Bot Commands")
                .description("Here is everything I can do:")
                .color(colors::INFO_BLUE),
            |embed, info| {
                let mut name = format!("`{}{}`", prefix, info.usage);
                if !info.aliases.is_empty() {
                    let aliases: Vec<String> =
                        info.aliases.iter().map(|a| format!("`{}{}`", prefix, a)).collect();
                    name.push_str(&format!(" ({})", aliases.join(", ")));
                }
                embed.field(name, info.description, false)
            },
        )
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn playback_error(track: &Track, error: &MusicError) -> CreateEmbed {
    CreateEmbed::default()
        .title("⚠️ Skipping Track")
        .description(format!("**{}**\n{}", track_link(track), error))
        .color(colors::WARNING_ORANGE)
        .footer(CreateEmbedFooter::new("Moving on to the next song"))
}

pub fn session_ended(reason: EndReason) -> CreateEmbed {
    let description = match reason {
        EndReason::IdleTimeout => "The queue has been empty for a while, so I left the voice channel.",
        EndReason::ConnectionLost => "The voice connection was lost and the queue has been cleared.",
    };

    CreateEmbed::default()
        .title("👋 Left Voice Channel")
        .description(description)
        .color(colors::INFO_BLUE)
}

pub fn error(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(title: &str) -> Track {
        Track::new(title, format!("https://youtu.be/{}", title), "3:32", "alice")
    }

    #[test]
    fn test_queue_lines_mark_the_head() {
        let snapshot = QueueSnapshot {
            tracks: vec![track("a"), track("b"), track("c")],
            is_playing: true,
        };

        assert_eq!(
            queue_lines(&snapshot, QUEUE_PAGE),
            vec![
                "🎵 **Now Playing:** [a](https://youtu.be/a) - `3:32`",
                "**1.** [b](https://youtu.be/b) - `3:32`",
                "**2.** [c](https://youtu.be/c) - `3:32`",
            ]
        );
    }

    #[test]
    fn test_queue_lines_respect_limit_and_pause() {
        let snapshot = QueueSnapshot {
            tracks: (0..15).map(|i| track(&i.to_string())).collect(),
            is_playing: false,
        };

        let lines = queue_lines(&snapshot, QUEUE_PAGE);
        assert_eq!(lines.len(), 10);
        assert!(lines[0].starts_with("⏸️ **Paused:**"));
        assert!(lines[9].starts_with("**9.**"));
    }
}
