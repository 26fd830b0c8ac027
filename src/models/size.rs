//! The fixed catalog of sizes every uploaded photo is rendered to.
//!
//! Names are part of the storage layout (`{photoId}/{SIZE}`) and of the
//! persisted size sets, so they must never change.

use serde::Serialize;

/// One named target size.
///
/// `target_height` is descriptive only: derivatives are scaled to
/// `target_width` and keep the original's aspect ratio, so the actual height
/// can differ from the nominal one.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeSpec {
    pub name: &'static str,
    pub width: i32,
    pub height: i32,
    pub description: &'static str,
}

/// The unscaled, as-uploaded image.
pub const ORIGINAL: SizeSpec = SizeSpec {
    name: "ORIGINAL",
    width: -1,
    height: -1,
    description: "original",
};

pub const THUMB: SizeSpec = SizeSpec {
    name: "THUMB",
    width: 180,
    height: 180,
    description: "thumbnail",
};

pub const MEDIUM: SizeSpec = SizeSpec {
    name: "MEDIUM",
    width: 1024,
    height: 768,
    description: "1024 x 768",
};

pub const SMALL: SizeSpec = SizeSpec {
    name: "SMALL",
    width: 640,
    height: 480,
    description: "640 x 480",
};

/// All sizes, `ORIGINAL` first. Iteration order is fixed.
pub static CATALOG: [SizeSpec; 4] = [ORIGINAL, THUMB, MEDIUM, SMALL];

impl SizeSpec {
    pub fn is_original(&self) -> bool {
        self.width < 0
    }
}

/// Look up a catalog entry by name.
pub fn find(name: &str) -> Option<&'static SizeSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

/// Every size except `ORIGINAL`, in catalog order.
pub fn derivatives() -> impl Iterator<Item = &'static SizeSpec> {
    CATALOG.iter().filter(|spec| !spec.is_original())
}

/// Output dimensions for rendering an image of `original` dimensions at `spec`.
///
/// Width is always the spec's width; height is `round(h * width / w)`, never
/// below one pixel. Returns `None` for `ORIGINAL` or a degenerate source.
pub fn scale_for(spec: &SizeSpec, original: (u32, u32)) -> Option<(u32, u32)> {
    let (width, height) = original;
    if spec.is_original() || spec.width == 0 || width == 0 {
        return None;
    }

    let scale_factor = f64::from(spec.width) / f64::from(width);
    let dst_height = (f64::from(height) * scale_factor).round().max(1.0) as u32;
    Some((spec.width as u32, dst_height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_values_are_fixed() {
        let names: Vec<_> = CATALOG.iter().map(|s| s.name).collect();
        assert_eq!(names, ["ORIGINAL", "THUMB", "MEDIUM", "SMALL"]);

        let dims: Vec<_> = CATALOG.iter().map(|s| (s.width, s.height)).collect();
        assert_eq!(dims, [(-1, -1), (180, 180), (1024, 768), (640, 480)]);

        let descriptions: Vec<_> = CATALOG.iter().map(|s| s.description).collect();
        assert_eq!(
            descriptions,
            ["original", "thumbnail", "1024 x 768", "640 x 480"]
        );
    }

    #[test]
    fn derivatives_skip_original_and_keep_order() {
        let names: Vec<_> = derivatives().map(|s| s.name).collect();
        assert_eq!(names, ["THUMB", "MEDIUM", "SMALL"]);
    }

    #[test]
    fn find_by_name() {
        assert_eq!(find("MEDIUM"), Some(&MEDIUM));
        assert_eq!(find("medium"), None);
        assert_eq!(find("HUGE"), None);
    }

    #[test]
    fn scale_preserves_aspect_ratio_relative_to_width() {
        assert_eq!(scale_for(&THUMB, (2000, 1000)), Some((180, 90)));
        assert_eq!(scale_for(&MEDIUM, (2000, 1000)), Some((1024, 512)));
        assert_eq!(scale_for(&SMALL, (2000, 1000)), Some((640, 320)));
        // portrait images exceed the nominal height
        assert_eq!(scale_for(&THUMB, (1000, 2000)), Some((180, 360)));
        // narrow sources are scaled up
        assert_eq!(scale_for(&SMALL, (320, 240)), Some((640, 480)));
    }

    #[test]
    fn scale_rounds_and_never_collapses() {
        assert_eq!(scale_for(&THUMB, (999, 333)), Some((180, 60)));
        assert_eq!(scale_for(&THUMB, (10_000, 1)), Some((180, 1)));
    }

    #[test]
    fn original_is_never_scaled() {
        assert_eq!(scale_for(&ORIGINAL, (2000, 1000)), None);
        assert_eq!(scale_for(&THUMB, (0, 100)), None);
    }
}
