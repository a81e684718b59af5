// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Reprojection of source geometries into a metric CRS.
//!
//! Buffers and tolerances are meaningless in degrees, so geographic
//! sources are transformed before any metric operation. The target is the
//! UTM zone under the layer extent's centroid; a projected project CRS is
//! the fallback. Global Mercator is never chosen automatically.
//!

use crate::FilterError;
use geos::{Geom, Geometry};
use proj::Proj;
use tracing::{debug, info};

/// Pick the UTM zone EPSG code for a lon/lat centroid: 326xx north of the
/// equator, 327xx south.
pub fn utm_zone_epsg(lon: f64, lat: f64) -> u32 {
    let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u32;
    if lat >= 0.0 { 32600 + zone } else { 32700 + zone }
}

/// Choose the metric CRS a geographic source is transformed into.
///
/// Preference order: UTM zone of the extent centroid, then the project CRS
/// when it is projected. EPSG:3857 is deliberately never picked.
pub fn select_metric_crs(
    extent: Option<[f64; 4]>,
    project_crs: &str,
    project_crs_is_geographic: bool,
) -> String {
    if let Some([xmin, ymin, xmax, ymax]) = extent {
        let lon = (xmin + xmax) / 2.0;
        let lat = (ymin + ymax) / 2.0;
        if (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat) {
            let epsg = utm_zone_epsg(lon, lat);
            debug!("select_metric_crs: UTM zone EPSG:{epsg} for centroid ({lon}, {lat})");
            return format!("EPSG:{epsg}");
        }
    }
    if !project_crs_is_geographic && !project_crs.is_empty() && project_crs != "EPSG:3857" {
        info!("select_metric_crs: falling back to project CRS {project_crs}");
        return project_crs.to_owned();
    }
    // Nothing better on offer.
    "EPSG:3857".to_owned()
}

/// A ready coordinate transformation between two CRSes.
///
/// Built once per request and applied to every source geometry. `proj`
/// handles are not `Sync`; instances stay on the thread that made them.
pub struct Reprojector {
    from: String,
    to: String,
    inner: Proj,
}

impl std::fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reprojector")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

impl Reprojector {
    /// Construct a transformation from `from` to `to` (authority ids).
    pub fn new(from: &str, to: &str) -> Result<Self, FilterError> {
        let inner = Proj::new_known_crs(from, to, None)?;
        Ok(Reprojector {
            from: from.to_owned(),
            to: to.to_owned(),
            inner,
        })
    }

    /// Target CRS authority id.
    pub fn target(&self) -> &str {
        &self.to
    }

    /// Transform one geometry, coordinate by coordinate.
    pub fn transform(&self, geom: &Geometry) -> Result<Geometry, FilterError> {
        let transformed = geom.transform_xy(|x, y| self.inner.convert((x, y)).ok())?;
        Ok(transformed)
    }
}
