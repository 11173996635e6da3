use crate::error::Result;
use crate::models::{Place, PlaceScrape};
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

const HEADER: [&str; 20] = [
    "Group ID",
    "Place",
    "Category",
    "Categories",
    "Place (UI)",
    "Place URL",
    "Input URL",
    "Lat",
    "Lng",
    "Review ID",
    "Review URL",
    "Rating",
    "Date",
    "Author",
    "Author URL",
    "Author Photo",
    "Is Local Guide",
    "Text",
    "Photo URLs",
    "RawReview",
];

/// Append-only CSV sink shared by all workers. The header is written once,
/// when the file is created empty; restarted batches keep appending to the
/// same file without duplicating it.
pub struct ReviewSink {
    writer: csv::Writer<std::fs::File>,
}

impl ReviewSink {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let fresh = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }
        Ok(Self { writer })
    }

    /// Serializes a list-valued cell as a JSON array so the loader side can
    /// round-trip it without a lossy join.
    fn json_list(items: &[String]) -> String {
        if items.is_empty() {
            String::new()
        } else {
            serde_json::to_string(items).unwrap_or_default()
        }
    }

    fn opt_f64(v: Option<f64>) -> String {
        v.map(|n| n.to_string()).unwrap_or_default()
    }

    /// Writes every review of one completed place as flat rows.
    pub fn write_batch(&mut self, place: &Place, scrape: &PlaceScrape) -> Result<usize> {
        let group_id = place.group_id.clone().unwrap_or_default();
        let category = place.category.clone().unwrap_or_default();
        let categories = place
            .categories
            .as_deref()
            .map(Self::json_list)
            .unwrap_or_default();
        let place_ui = scrape.place_title_ui.clone().unwrap_or_default();
        let place_url = scrape
            .place_url_ui
            .clone()
            .or_else(|| place.place_url.clone())
            .unwrap_or_default();
        let input_url = place.input_url();
        let lat = Self::opt_f64(scrape.lat);
        let lng = Self::opt_f64(scrape.lng);

        for review in &scrape.reviews {
            let raw = review
                .raw_payload
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
            self.writer.write_record([
                group_id.as_str(),
                place.name.as_str(),
                category.as_str(),
                categories.as_str(),
                place_ui.as_str(),
                place_url.as_str(),
                input_url.as_str(),
                lat.as_str(),
                lng.as_str(),
                review.review_id.as_str(),
                review.review_url.as_deref().unwrap_or(""),
                &Self::opt_f64(review.rating),
                &review
                    .date
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_default(),
                review.author.as_deref().unwrap_or(""),
                review.author_url.as_deref().unwrap_or(""),
                review.author_photo.as_deref().unwrap_or(""),
                if review.is_local_guide { "true" } else { "false" },
                review.text.as_deref().unwrap_or(""),
                &Self::json_list(&review.photo_urls),
                raw.as_str(),
            ])?;
        }
        self.writer.flush()?;
        debug!(
            place = %place.name,
            rows = scrape.reviews.len(),
            "appended place batch"
        );
        Ok(scrape.reviews.len())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Review, StopReason};

    fn sample_scrape() -> PlaceScrape {
        let mut review = Review::empty("r1");
        review.rating = Some(5.0);
        review.author = Some("Ada".to_string());
        review.text = Some("Great, with \"quotes\"".to_string());
        review.photo_urls = vec!["https://lh3.googleusercontent.com/p/abc=s0".to_string()];
        PlaceScrape {
            place_title_ui: Some("Cafe X".to_string()),
            place_url_ui: Some("https://maps.google.com/?cid=42".to_string()),
            lat: Some(41.3851),
            lng: Some(2.1734),
            ui_total: Some(1),
            stop_reason: StopReason::IdleExhausted,
            reviews: vec![review],
        }
    }

    #[test]
    fn test_header_written_once_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let place = Place::new("p1", "Cafe X").unwrap();

        {
            let mut sink = ReviewSink::open(&path).unwrap();
            sink.write_batch(&place, &sample_scrape()).unwrap();
        }
        {
            let mut sink = ReviewSink::open(&path).unwrap();
            sink.write_batch(&place, &sample_scrape()).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("Group ID").count(), 1);
        assert_eq!(content.matches("r1").count(), 2);
    }

    #[test]
    fn test_rows_round_trip_through_csv_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut place = Place::new("p1", "Cafe X").unwrap();
        place.categories = Some(vec!["Cafe".to_string(), "Bar".to_string()]);

        let mut sink = ReviewSink::open(&path).unwrap();
        sink.write_batch(&place, &sample_scrape()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap().len(), HEADER.len());
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.get(1), Some("Cafe X"));
        assert_eq!(row.get(3), Some(r#"["Cafe","Bar"]"#));
        assert_eq!(row.get(9), Some("r1"));
        assert_eq!(row.get(17), Some("Great, with \"quotes\""));
    }
}
