/// Closest-capital lookup over the reference country list
use crate::domain::{Coordinates, Country};
use crate::utils::haversine_km;

/// Nearest capital to `point` by great-circle distance.
///
/// Linear scan; the first candidate at the minimum distance wins. Records
/// without a usable coordinate pair are skipped.
pub fn closest_capital<'a>(candidates: &'a [Country], point: Coordinates) -> Option<&'a Country> {
    let mut best: Option<(&Country, f64)> = None;

    for country in candidates {
        let Some(at) = country.coordinates() else {
            continue;
        };
        let distance = haversine_km(at.latitude, at.longitude, point.latitude, point.longitude);
        match best {
            Some((_, d)) if d <= distance => {}
            _ => best = Some((country, distance)),
        }
    }

    best.map(|(country, _)| country)
}

/// Drop records without a capital and order by capital name.
///
/// Case-insensitive with a byte-wise tie-break, so sorting twice is a no-op.
pub fn sort_capitals(mut countries: Vec<Country>) -> Vec<Country> {
    countries.retain(|c| !c.capital.trim().is_empty());
    countries.sort_by(|a, b| {
        a.capital
            .to_lowercase()
            .cmp(&b.capital.to_lowercase())
            .then_with(|| a.capital.cmp(&b.capital))
    });
    countries
}

/// Index-based selection over the sorted list
pub fn city_from_index(countries: &[Country], index: usize) -> Option<&Country> {
    countries.get(index)
}
