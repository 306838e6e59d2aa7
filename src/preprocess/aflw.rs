//! AFLW face metadata
//!
//! Face rectangles come from the `aflw.sqlite` store shipped with the
//! dataset, keyed by image file name.

use std::collections::HashMap;
use std::path::Path;

use image::DynamicImage;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

use super::{FaceRect, FaceSource};
use crate::error::Result;

pub const AFLW_SQLITE_FILE: &str = "aflw.sqlite";

const FACE_METADATA_SQL: &str = r"
SELECT
  f.file_id AS file_id,
  fr.x AS x,
  fr.y AS y,
  fr.w AS w,
  fr.h AS h
FROM
  facerect AS fr
  JOIN faces AS f ON fr.face_id = f.face_id
WHERE
  fr.annot_type_id = 1
";

/// `file_id -> [FaceRect]` loaded from the AFLW store
#[derive(Debug, Clone, Default)]
pub struct AflwMetadata {
    faces: HashMap<String, Vec<FaceRect>>,
}

impl AflwMetadata {
    /// Read `aflw.sqlite` under `data_root`
    pub fn open(data_root: &Path) -> Result<Self> {
        let path = data_root.join(AFLW_SQLITE_FILE);
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let metadata = Self::load(&conn)?;
        info!(
            images = metadata.faces.len(),
            path = %path.display(),
            "Loaded AFLW face metadata"
        );
        Ok(metadata)
    }

    /// Run the face-rect query on an open connection
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(FACE_METADATA_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                FaceRect::new(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?),
            ))
        })?;

        let mut faces: HashMap<String, Vec<FaceRect>> = HashMap::new();
        for row in rows {
            let (file_id, rect) = row?;
            faces.entry(file_id).or_default().push(rect);
        }
        Ok(Self { faces })
    }

    pub fn faces_for(&self, file_id: &str) -> Option<&[FaceRect]> {
        self.faces.get(file_id).map(Vec::as_slice)
    }

    /// Number of images with at least one face
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

impl FaceSource for AflwMetadata {
    fn accepts(&self, file_name: &str) -> bool {
        file_name.ends_with(".jpg") && self.faces.contains_key(file_name)
    }

    fn faces(&self, file_name: &str, _image: &DynamicImage) -> Result<Vec<FaceRect>> {
        Ok(self.faces_for(file_name).map(<[FaceRect]>::to_vec).unwrap_or_default())
    }
}
