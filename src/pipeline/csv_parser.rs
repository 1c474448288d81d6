use crate::domain::{ImdbRecord, ImportSource, LetterboxdRecord, RawImportRecord};
use csv::{ReaderBuilder, StringRecord, Trim};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

static IMDB_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^tt\d{5,}$").unwrap());
static IMDB_ID_IN_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/title/(tt\d{5,})").unwrap());

// Accepted header spellings per logical field, in priority order.
mod imdb_columns {
    pub const ID: &[&str] = &["const", "tconst", "imdb id", "imdb_id", "id"];
    pub const TITLE: &[&str] = &["title", "original title", "primary title", "name"];
    pub const YEAR: &[&str] = &["year", "release year", "startyear"];
    pub const RELEASE_DATE: &[&str] = &["release date"];
    pub const TITLE_TYPE: &[&str] = &["title type", "titletype", "type"];
    pub const RATING: &[&str] = &["your rating", "rating"];
    pub const DATE_ADDED: &[&str] = &["date rated", "date added", "created"];
    pub const URL: &[&str] = &["url"];
}

mod letterboxd_columns {
    pub const TITLE: &[&str] = &["name", "title", "film"];
    pub const YEAR: &[&str] = &["year", "release year"];
    pub const URI: &[&str] = &["letterboxd uri", "uri", "url"];
    pub const RATING: &[&str] = &["rating"];
    pub const DATE_ADDED: &[&str] = &["date", "watched date", "date added"];
}

/// Column positions resolved from the header row.
struct HeaderIndex {
    columns: Vec<String>,
}

impl HeaderIndex {
    fn new(header: &[String]) -> Self {
        Self {
            columns: header.iter().map(|h| h.trim().to_lowercase()).collect(),
        }
    }

    /// First alias present in the header wins.
    fn position(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.columns.iter().position(|c| c == alias))
    }
}

/// A data row with its header, giving access by logical field.
struct Row<'a> {
    index: &'a HeaderIndex,
    fields: Vec<String>,
}

impl Row<'_> {
    fn get(&self, aliases: &[&str]) -> Option<&str> {
        let pos = self.index.position(aliases)?;
        self.fields
            .get(pos)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
    }
}

pub struct CsvParser;

impl CsvParser {
    /// Parses an export into raw records, in file order.
    ///
    /// Never fails: unreadable lines, blank lines and rows without a title or
    /// external id are skipped. Quoted fields may contain commas and doubled
    /// quotes but never span lines.
    pub fn parse(source: ImportSource, content: &str) -> Vec<RawImportRecord> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() < 2 {
            return Vec::new();
        }

        let mut lines = lines.into_iter().filter(|l| !l.trim().is_empty());
        let header = match lines.next().and_then(split_line) {
            Some(header) => header,
            None => return Vec::new(),
        };
        let index = HeaderIndex::new(&header);

        let mut records = Vec::new();
        let mut dropped = 0usize;
        for line in lines {
            let Some(fields) = split_line(line) else {
                dropped += 1;
                continue;
            };
            let row = Row { index: &index, fields };
            let record = match source {
                ImportSource::Imdb => imdb_record(&row).map(RawImportRecord::Imdb),
                ImportSource::Letterboxd => {
                    letterboxd_record(&row).map(RawImportRecord::Letterboxd)
                }
            };
            match record {
                Some(record) => records.push(record),
                None => dropped += 1,
            }
        }

        info!(
            source = %source,
            records = records.len(),
            dropped,
            "Parsed import file"
        );
        records
    }
}

fn split_line(line: &str) -> Option<Vec<String>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(line.as_bytes());
    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record.iter().map(str::to_string).collect()),
        Ok(false) => None,
        Err(e) => {
            debug!("Skipping unreadable CSV line: {}", e);
            None
        }
    }
}

fn imdb_record(row: &Row<'_>) -> Option<ImdbRecord> {
    let imdb_id = row
        .get(imdb_columns::ID)
        .filter(|id| IMDB_ID_RE.is_match(id))
        .map(str::to_string)
        .or_else(|| {
            row.get(imdb_columns::URL)
                .and_then(|url| IMDB_ID_IN_URL_RE.captures(url))
                .map(|c| c[1].to_string())
        });
    let title = row.get(imdb_columns::TITLE).unwrap_or_default().to_string();
    if title.is_empty() && imdb_id.is_none() {
        return None;
    }

    let year = row
        .get(imdb_columns::YEAR)
        .and_then(parse_year)
        .or_else(|| row.get(imdb_columns::RELEASE_DATE).and_then(parse_year));

    Some(ImdbRecord {
        imdb_id,
        title,
        year,
        title_type: row.get(imdb_columns::TITLE_TYPE).map(str::to_string),
        your_rating: row.get(imdb_columns::RATING).and_then(|r| r.parse().ok()),
        date_added: row.get(imdb_columns::DATE_ADDED).map(str::to_string),
    })
}

fn letterboxd_record(row: &Row<'_>) -> Option<LetterboxdRecord> {
    let title = row.get(letterboxd_columns::TITLE)?.to_string();
    Some(LetterboxdRecord {
        title,
        year: row.get(letterboxd_columns::YEAR).and_then(parse_year),
        letterboxd_uri: row.get(letterboxd_columns::URI).map(str::to_string),
        rating: row.get(letterboxd_columns::RATING).and_then(|r| r.parse().ok()),
        date_added: row.get(letterboxd_columns::DATE_ADDED).map(str::to_string),
    })
}

/// Reads a leading four-digit year ("1999", "1999-03-31").
fn parse_year(value: &str) -> Option<i32> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}
