use crate::domain::model::RawRecord;
use crate::domain::ports::{Fetch, FetchOptions};
use crate::fetch::file::download_file;
use crate::utils::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use shapefile::dbase::FieldValue;
use shapefile::Shape;
use std::path::{Path, PathBuf};
use wkt::ToWkt;

const ARCHIVE_NAME: &str = "download.zip";

/// Fetcher for geographic boundary datasets distributed as zipped
/// shapefile archives.
///
/// The archive is downloaded and extracted into a per-dataset working
/// directory. An already-extracted `.shp` file short-circuits the
/// download unless a refresh is forced, and the zip itself is removed
/// after extraction whether or not it succeeded.
pub struct ShapefileFetcher {
    client: Client,
    url: String,
    target_filename: String,
    work_dir: PathBuf,
}

impl ShapefileFetcher {
    pub fn new(url: String, target_filename: String, work_dir: PathBuf) -> Self {
        Self {
            client: Client::new(),
            url,
            target_filename,
            work_dir,
        }
    }

    pub async fn fetch_data(&self, force: bool) -> Result<Vec<RawRecord>> {
        std::fs::create_dir_all(&self.work_dir)?;
        let mut shp_path = self.work_dir.join(&self.target_filename);

        if !shp_path.exists() || force {
            self.download_and_extract().await?;
        } else {
            tracing::info!(
                "Shapefile found at {}, skipping download",
                shp_path.display()
            );
        }

        if !shp_path.exists() {
            match find_first_shapefile(&self.work_dir)? {
                Some(found) => {
                    tracing::warn!(
                        "Configured filename {} not found, using {}",
                        self.target_filename,
                        found.display()
                    );
                    shp_path = found;
                }
                None => {
                    return Err(IngestError::Fetch {
                        message: format!("No .shp file found in {}", self.work_dir.display()),
                    });
                }
            }
        }

        tracing::info!("Loading shapefile {}", shp_path.display());
        read_shapefile(&shp_path)
    }

    async fn download_and_extract(&self) -> Result<()> {
        let zip_path = self.work_dir.join(ARCHIVE_NAME);

        tracing::info!("Downloading shapefile archive from {}", self.url);
        let result = self.try_download_and_extract(&zip_path).await;
        if zip_path.exists() {
            let _ = std::fs::remove_file(&zip_path);
        }
        result
    }

    async fn try_download_and_extract(&self, zip_path: &Path) -> Result<()> {
        download_file(&self.client, &self.url, zip_path).await?;
        tracing::info!("Extracting archive into {}", self.work_dir.display());
        let file = std::fs::File::open(zip_path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        archive.extract(&self.work_dir)?;
        Ok(())
    }
}

#[async_trait]
impl Fetch for ShapefileFetcher {
    async fn fetch(&self, opts: &FetchOptions) -> Result<Vec<RawRecord>> {
        self.fetch_data(opts.force).await
    }
}

fn find_first_shapefile(dir: &Path) -> Result<Option<PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("shp") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Read every feature of a shapefile into raw records. Attribute
/// fields keep their dbf names and the geometry lands under a
/// `geometry` key as a WKT string.
pub(crate) fn read_shapefile(path: &Path) -> Result<Vec<RawRecord>> {
    let mut reader = shapefile::Reader::from_path(path)?;
    let mut records = Vec::new();
    for entry in reader.iter_shapes_and_records() {
        let (shape, attributes) = entry?;
        let mut record = RawRecord::new();
        for (name, value) in attributes {
            record.data.insert(name, field_to_json(value));
        }
        record
            .data
            .insert("geometry".to_string(), shape_to_wkt(shape));
        records.push(record);
    }
    tracing::info!("Loaded {} features from {}", records.len(), path.display());
    Ok(records)
}

fn field_to_json(value: FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Character(Some(text)) => serde_json::Value::String(text),
        FieldValue::Numeric(Some(number)) => serde_json::json!(number),
        FieldValue::Float(Some(number)) => serde_json::json!(number),
        FieldValue::Integer(number) => serde_json::json!(number),
        FieldValue::Double(number) => serde_json::json!(number),
        FieldValue::Logical(Some(flag)) => serde_json::Value::Bool(flag),
        FieldValue::Date(Some(date)) => serde_json::Value::String(format!(
            "{:04}-{:02}-{:02}",
            date.year(),
            date.month(),
            date.day()
        )),
        _ => serde_json::Value::Null,
    }
}

fn shape_to_wkt(shape: Shape) -> serde_json::Value {
    match shape {
        Shape::NullShape => serde_json::Value::Null,
        Shape::Point(point) => {
            serde_json::Value::String(geo_types::Point::<f64>::from(point).wkt_string())
        }
        Shape::Polyline(line) => {
            serde_json::Value::String(geo_types::MultiLineString::<f64>::from(line).wkt_string())
        }
        Shape::Multipoint(points) => {
            serde_json::Value::String(geo_types::MultiPoint::<f64>::from(points).wkt_string())
        }
        Shape::Polygon(polygon) => {
            serde_json::Value::String(geo_types::MultiPolygon::<f64>::from(polygon).wkt_string())
        }
        other => {
            tracing::warn!(
                "Unsupported shape type {}, storing null geometry",
                other.shapetype()
            );
            serde_json::Value::Null
        }
    }
}
