//! Export packaging: a CSV table with a per-category schema and a zip of the
//! normalized images.

use std::io::{Cursor, Write};

use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use super::ProcessedItem;
use crate::error::{Error, Result};
use crate::model::{Artifact, Category};

const PORTUGAL_COLUMNS: [&str; 8] = [
    "ID",
    "images",
    "category",
    "price",
    "name pt",
    "name en",
    "description pt",
    "description en",
];

const GHANA_COLUMNS: [&str; 6] = [
    "ID",
    "Category",
    "Images",
    "Name en-US",
    "Description en-US",
    "Price",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct OutputPackager;

impl OutputPackager {
    pub fn columns(category: Category) -> &'static [&'static str] {
        match category {
            Category::Portugal => &PORTUGAL_COLUMNS,
            Category::Ghana => &GHANA_COLUMNS,
        }
    }

    pub fn table_name(category: Category) -> String {
        format!("scraped_menu_{}_final.csv", category.slug())
    }

    pub fn bundle_name(category: Category) -> String {
        format!("scraped_menu_images_{}.zip", category.slug())
    }

    /// Export table for `items`, or `None` when there are none.
    pub fn table(&self, category: Category, items: &[ProcessedItem]) -> Result<Option<Artifact>> {
        if items.is_empty() {
            return Ok(None);
        }
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(Self::columns(category))?;
        for p in items {
            let item = &p.item;
            let opt = |v: &Option<String>| v.clone().unwrap_or_default();
            let record: Vec<String> = match category {
                Category::Portugal => vec![
                    item.id.clone(),
                    p.image_status.clone(),
                    opt(&item.section),
                    opt(&item.price),
                    opt(&item.name),
                    String::new(),
                    opt(&item.description),
                    String::new(),
                ],
                Category::Ghana => vec![
                    item.id.clone(),
                    opt(&item.section),
                    p.image_status.clone(),
                    opt(&item.name),
                    opt(&item.description),
                    opt(&item.price),
                ],
            };
            writer.write_record(&record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::ExtractionPipeline(format!("export table: {e}")))?;
        Ok(Some(Artifact {
            filename: Self::table_name(category),
            bytes,
        }))
    }

    /// Deflated zip of `images`, or `None` when there are none.
    pub fn bundle(&self, filename: String, images: &[Artifact]) -> Result<Option<Artifact>> {
        if images.is_empty() {
            return Ok(None);
        }
        let zip_err = |e: zip::result::ZipError| Error::ExtractionPipeline(format!("bundle: {e}"));
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for image in images {
            zip.start_file(image.filename.as_str(), options)
                .map_err(zip_err)?;
            zip.write_all(&image.bytes)?;
        }
        let cursor = zip.finish().map_err(zip_err)?;
        Ok(Some(Artifact {
            filename,
            bytes: cursor.into_inner(),
        }))
    }
}
