use crate::app::ports::{MetadataSearchPort, SearchHit};
use crate::constants::YEAR_TOLERANCE;
use crate::domain::MediaType;
use tracing::{debug, warn};

/// Title search within one media type, widening the year filter step by step:
/// exact year, then year-1, then year+1, then an unfiltered search keeping
/// the candidate closest to the target year (within the tolerance).
///
/// Without a target year only the unfiltered search runs and its top hit is
/// taken. Failed calls count as empty results for their step.
pub async fn resolve_by_title(
    search: &dyn MetadataSearchPort,
    media_type: MediaType,
    title: &str,
    year: Option<i32>,
) -> Option<SearchHit> {
    let title = title.trim();
    if title.is_empty() {
        return None;
    }

    let Some(target) = year else {
        return search_step(search, media_type, title, None).await.into_iter().next();
    };

    for candidate_year in [target, target - 1, target + 1] {
        if let Some(hit) = search_step(search, media_type, title, Some(candidate_year))
            .await
            .into_iter()
            .next()
        {
            debug!(title, %media_type, candidate_year, catalog_id = hit.catalog_id, "Matched with year filter");
            return Some(hit);
        }
    }

    let hits = search_step(search, media_type, title, None).await;
    let closest = closest_by_year(&hits, target, YEAR_TOLERANCE).cloned();
    if let Some(hit) = &closest {
        debug!(title, %media_type, catalog_id = hit.catalog_id, "Matched by closest year");
    }
    closest
}

/// The hit whose year is nearest `target`, ignoring hits further than
/// `tolerance` years away or without a year. Ties keep ranking order.
pub fn closest_by_year(hits: &[SearchHit], target: i32, tolerance: i32) -> Option<&SearchHit> {
    hits.iter()
        .filter_map(|hit| hit.year.map(|y| (hit, (y - target).abs())))
        .filter(|(_, distance)| *distance <= tolerance)
        .min_by_key(|(_, distance)| *distance)
        .map(|(hit, _)| hit)
}

async fn search_step(
    search: &dyn MetadataSearchPort,
    media_type: MediaType,
    title: &str,
    year: Option<i32>,
) -> Vec<SearchHit> {
    match search.search_titles(media_type, title, year).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(title, %media_type, ?year, "Title search failed: {}", e);
            Vec::new()
        }
    }
}
