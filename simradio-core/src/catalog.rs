//! Station catalog: series of stations loaded once and shared read-only.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Opaque, stable identifier of a station.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A playable station (or downloadable media item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub title: String,
    /// Genre or subtitle shown under the title
    #[serde(default)]
    pub genre: String,
    /// Artwork reference (URL or bundled asset name)
    #[serde(default)]
    pub artwork: Option<String>,
    /// Where the station media can be downloaded from
    #[serde(default)]
    pub media_url: Option<Url>,
}

impl Station {
    #[must_use]
    pub fn new(id: impl Into<StationId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            genre: String::new(),
            artwork: None,
            media_url: None,
        }
    }

    #[must_use]
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    #[must_use]
    pub fn with_artwork(mut self, artwork: impl Into<String>) -> Self {
        self.artwork = Some(artwork.into());
        self
    }

    #[must_use]
    pub fn with_media_url(mut self, url: Url) -> Self {
        self.media_url = Some(url);
        self
    }
}

/// A titled group of stations browsed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub id: String,
    pub title: String,
    pub artwork: Option<String>,
    pub stations: Vec<Arc<Station>>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    series: Vec<SeriesFile>,
}

#[derive(Debug, Deserialize)]
struct SeriesFile {
    id: String,
    title: String,
    #[serde(default)]
    artwork: Option<String>,
    #[serde(default)]
    stations: Vec<Station>,
}

/// Immutable set of series with a station index.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    series: Vec<Series>,
    index: HashMap<StationId, Arc<Station>>,
}

impl Catalog {
    /// Build a catalog from series.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateStation`] if a station id appears twice.
    pub fn from_series(series: Vec<Series>) -> Result<Self> {
        let mut index = HashMap::new();
        for station in series.iter().flat_map(|s| s.stations.iter()) {
            if index.insert(station.id.clone(), Arc::clone(station)).is_some() {
                return Err(CoreError::DuplicateStation {
                    id: station.id.clone(),
                });
            }
        }
        Ok(Self { series, index })
    }

    /// Parse a catalog from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or contains duplicate station ids.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let series = file
            .series
            .into_iter()
            .map(|s| Series {
                id: s.id,
                title: s.title,
                artwork: s.artwork,
                stations: s.stations.into_iter().map(Arc::new).collect(),
            })
            .collect();
        Self::from_series(series)
    }

    /// Load a catalog JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&content)?;
        info!(
            "Loaded catalog from {} ({} series, {} stations)",
            path.display(),
            catalog.series.len(),
            catalog.len()
        );
        Ok(catalog)
    }

    /// Look up a station by id
    #[must_use]
    pub fn station(&self, id: &StationId) -> Option<&Arc<Station>> {
        self.index.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &StationId) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn series(&self) -> &[Series] {
        &self.series
    }

    /// Stations in browsing order (series order, then station order)
    pub fn stations(&self) -> impl Iterator<Item = &Arc<Station>> {
        self.series.iter().flat_map(|s| s.stations.iter())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_JSON: &str = r#"{
        "series": [
            {
                "id": "gta-sa",
                "title": "GTA San Andreas",
                "artwork": "gta_sa.png",
                "stations": [
                    {"id": "radio-x", "title": "Radio X", "genre": "Alternative"},
                    {
                        "id": "k-dst",
                        "title": "K-DST",
                        "genre": "Classic Rock",
                        "media_url": "https://media.example.com/k-dst.m4a"
                    }
                ]
            },
            {
                "id": "gta-vc",
                "title": "GTA Vice City",
                "stations": [{"id": "flash-fm", "title": "Flash FM"}]
            }
        ]
    }"#;

    #[test]
    fn test_from_json() {
        let catalog = Catalog::from_json(CATALOG_JSON).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.series().len(), 2);
        assert_eq!(catalog.series()[0].artwork.as_deref(), Some("gta_sa.png"));

        let kdst = catalog.station(&StationId::from("k-dst")).unwrap();
        assert_eq!(kdst.title, "K-DST");
        assert_eq!(kdst.genre, "Classic Rock");
        assert_eq!(
            kdst.media_url.as_ref().map(Url::as_str),
            Some("https://media.example.com/k-dst.m4a")
        );

        let flash = catalog.station(&StationId::from("flash-fm")).unwrap();
        assert!(flash.genre.is_empty());
        assert!(flash.media_url.is_none());
    }

    #[test]
    fn test_stations_in_browsing_order() {
        let catalog = Catalog::from_json(CATALOG_JSON).unwrap();
        let ids: Vec<_> = catalog.stations().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["radio-x", "k-dst", "flash-fm"]);
    }

    #[test]
    fn test_duplicate_station_rejected() {
        let json = r#"{"series": [
            {"id": "a", "title": "A", "stations": [{"id": "dup", "title": "One"}]},
            {"id": "b", "title": "B", "stations": [{"id": "dup", "title": "Two"}]}
        ]}"#;

        let err = Catalog::from_json(json).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateStation { id } if id.as_str() == "dup"));
    }

    #[test]
    fn test_malformed_json() {
        let err = Catalog::from_json("{\"series\": [").unwrap_err();
        assert!(matches!(err, CoreError::CatalogParseError(_)));
    }

    #[test]
    fn test_unknown_station() {
        let catalog = Catalog::from_json(CATALOG_JSON).unwrap();
        assert!(!catalog.contains(&StationId::from("lazlow")));
        assert!(catalog.station(&StationId::from("lazlow")).is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, CATALOG_JSON).unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_station_builder() {
        let station = Station::new("radio-x", "Radio X")
            .with_genre("Alternative")
            .with_artwork("radio_x.png");

        assert_eq!(station.id, StationId::from("radio-x"));
        assert_eq!(station.genre, "Alternative");
        assert_eq!(station.artwork.as_deref(), Some("radio_x.png"));
    }
}
