/// Source discriminator values accepted by the import endpoint and CLI.
pub const IMDB_SOURCE: &str = "imdb";
pub const LETTERBOXD_SOURCE: &str = "letterboxd";

/// Get all supported source names
pub fn get_supported_sources() -> Vec<&'static str> {
    vec![IMDB_SOURCE, LETTERBOXD_SOURCE]
}

// Progress bands (percent of the whole import)
pub const PARSING_BAND: (u8, u8) = (0, 10);
pub const MATCHING_BAND: (u8, u8) = (10, 50);
pub const SAVING_BAND: (u8, u8) = (50, 100);

/// Candidates from an unrestricted search must be within this many years of the target.
pub const YEAR_TOLERANCE: i32 = 2;

/// Capacity of the per-import progress channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;
