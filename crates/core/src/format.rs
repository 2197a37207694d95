use crate::models::{ComponentHit, SearchResultRow};

/// Cosine distance to a whole-number similarity percentage.
///
/// Cosine distance runs up to 2.0, so anything past 1.0 would go negative;
/// the result is clamped to `0..=100`.
pub fn similarity_percent(distance: f64) -> u8 {
    let percent = ((1.0 - distance) * 100.0).round();
    if percent.is_nan() {
        return 0;
    }
    percent.clamp(0.0, 100.0) as u8
}

pub fn format_search_result(hit: &ComponentHit) -> SearchResultRow {
    SearchResultRow {
        patent_uri: hit.uri.clone(),
        component: hit.component_name.clone(),
        function: hit.component_function.clone(),
        similarity: similarity_percent(hit.distance),
    }
}

pub fn format_search_results(hits: &[ComponentHit]) -> Vec<SearchResultRow> {
    hits.iter().map(format_search_result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_maps_to_percentage() {
        assert_eq!(similarity_percent(0.2), 80);
        assert_eq!(similarity_percent(1.0), 0);
        assert_eq!(similarity_percent(0.0), 100);
        assert_eq!(similarity_percent(0.126), 87);
    }

    #[test]
    fn similarity_is_clamped() {
        assert_eq!(similarity_percent(1.5), 0);
        assert_eq!(similarity_percent(2.0), 0);
        assert_eq!(similarity_percent(-0.1), 100);
        assert_eq!(similarity_percent(f64::NAN), 0);
    }

    #[test]
    fn rows_keep_hit_fields() {
        let rows = format_search_results(&[ComponentHit {
            uri: "gs://patents/US1.pdf".to_string(),
            component_name: "heat sink".to_string(),
            component_function: "dissipates heat".to_string(),
            distance: 0.35,
        }]);

        assert_eq!(
            rows,
            vec![SearchResultRow {
                patent_uri: "gs://patents/US1.pdf".to_string(),
                component: "heat sink".to_string(),
                function: "dissipates heat".to_string(),
                similarity: 65,
            }]
        );
    }
}
