use crate::config::ViewParams;
use crate::coord::ChunkCoord;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClipmapCell {
    pub lod: u8,
    pub in_visible_range: bool,
    pub in_cached_range: bool,
}

/// Classification of chunk offsets around the viewer.
///
/// Cells depend only on the relative offset, so they are computed once per parameter
/// change and stored in a `(2 * cached_radius + 1)^2` grid addressed with wrap-around.
/// Re-centering only moves `center`; world lookups translate through it.
#[derive(Clone, Debug)]
pub struct Clipmap {
    params: ViewParams,
    chunk_size: usize,
    side: i32,
    cells: Vec<ClipmapCell>,
    center: ChunkCoord,
}

impl Clipmap {
    pub fn new(params: ViewParams, chunk_size: usize) -> Self {
        let mut map = Self {
            params,
            chunk_size,
            side: 0,
            cells: Vec::new(),
            center: ChunkCoord::default(),
        };
        map.rebuild();
        map
    }

    #[inline]
    pub fn params(&self) -> ViewParams {
        self.params
    }

    #[inline]
    pub fn center(&self) -> ChunkCoord {
        self.center
    }

    #[inline]
    pub fn cached_radius(&self) -> i32 {
        self.params.cached_radius
    }

    #[inline]
    pub fn visible_radius(&self) -> i32 {
        self.params.visible_radius
    }

    /// Apply new radii or LOD tunables. Returns true if the cells were recomputed.
    pub fn reconfigure(&mut self, params: ViewParams) -> bool {
        if params == self.params {
            return false;
        }
        self.params = params;
        self.rebuild();
        true
    }

    /// Move the map to a new viewer chunk. O(1): no cell is touched.
    /// Returns false if the viewer is still in the same chunk.
    pub fn recenter(&mut self, viewer: ChunkCoord) -> bool {
        if viewer == self.center {
            return false;
        }
        self.center = viewer;
        true
    }

    /// Cell for an offset relative to the viewer. Offsets past the cached radius
    /// classify as outside every band.
    pub fn get(&self, dx: i32, dz: i32) -> ClipmapCell {
        let r = self.params.cached_radius;
        if dx.abs() > r || dz.abs() > r {
            return ClipmapCell {
                lod: self.max_lod(),
                in_visible_range: false,
                in_cached_range: false,
            };
        }
        self.cells[self.slot(dx, dz)]
    }

    /// Cell for an absolute chunk coordinate, translated by the current center.
    #[inline]
    pub fn get_transformed(&self, coord: ChunkCoord) -> ClipmapCell {
        self.get(coord.cx - self.center.cx, coord.cz - self.center.cz)
    }

    /// Whether `coord` still lies within the cached band. Chunks failing this are evicted.
    #[inline]
    pub fn is_inside_bounds(&self, coord: ChunkCoord) -> bool {
        coord.chebyshev(self.center) <= self.params.cached_radius
    }

    /// The LOD a cell `max(|dx|, |dz|)` chunks away gets.
    pub fn lod_for(&self, dx: i32, dz: i32) -> u8 {
        if let Some(lod) = self.params.forced_lod {
            return lod;
        }
        let levels = self.max_lod();
        let dist = dx.abs().max(dz.abs()) as f32;
        let step = self.params.lod_coefficient * f32::from(levels);
        let lod = (dist / step).floor() as i32;
        lod.clamp(0, i32::from(levels)) as u8
    }

    #[inline]
    fn max_lod(&self) -> u8 {
        self.chunk_size.trailing_zeros() as u8
    }

    fn slot(&self, dx: i32, dz: i32) -> usize {
        let x = dx.rem_euclid(self.side);
        let z = dz.rem_euclid(self.side);
        (z * self.side + x) as usize
    }

    fn rebuild(&mut self) {
        let r = self.params.cached_radius.max(0);
        self.side = 2 * r + 1;
        let len = (self.side * self.side) as usize;
        self.cells.clear();
        self.cells.resize(len, ClipmapCell::default());
        for dz in -r..=r {
            for dx in -r..=r {
                let cheb = dx.abs().max(dz.abs());
                let cell = ClipmapCell {
                    lod: self.lod_for(dx, dz),
                    in_visible_range: cheb <= self.params.visible_radius,
                    in_cached_range: cheb <= r,
                };
                let slot = self.slot(dx, dz);
                self.cells[slot] = cell;
            }
        }
        log::debug!(
            target: "stream",
            "clipmap rebuilt: visible={} cached={} forced_lod={:?} coef={}",
            self.params.visible_radius,
            r,
            self.params.forced_lod,
            self.params.lod_coefficient
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(visible: i32, cached: i32) -> ViewParams {
        ViewParams {
            visible_radius: visible,
            cached_radius: cached,
            forced_lod: None,
            lod_coefficient: 1.0,
        }
    }

    #[test]
    fn bands_use_chebyshev_distance() {
        let map = Clipmap::new(params(2, 3), 16);
        assert!(map.get(2, -2).in_visible_range);
        assert!(!map.get(3, 0).in_visible_range);
        assert!(map.get(3, -3).in_cached_range);
        assert!(!map.get(4, 0).in_cached_range);
    }

    #[test]
    fn lod_grows_with_distance_and_clamps() {
        // log2(16) = 4 chunks per level at coefficient 1.
        let map = Clipmap::new(params(30, 30), 16);
        assert_eq!(map.get(0, 0).lod, 0);
        assert_eq!(map.get(3, 1).lod, 0);
        assert_eq!(map.get(4, 0).lod, 1);
        assert_eq!(map.get(-9, 2).lod, 2);
        assert_eq!(map.get(30, 30).lod, 4);
    }

    #[test]
    fn forced_lod_overrides_distance() {
        let mut p = params(4, 5);
        p.forced_lod = Some(2);
        let map = Clipmap::new(p, 16);
        assert_eq!(map.get(0, 0).lod, 2);
        assert_eq!(map.get(5, 5).lod, 2);
    }

    #[test]
    fn recenter_translates_bounds() {
        let mut map = Clipmap::new(params(1, 2), 8);
        assert!(map.is_inside_bounds(ChunkCoord::new(2, 0)));
        assert!(!map.is_inside_bounds(ChunkCoord::new(3, 0)));
        assert!(map.recenter(ChunkCoord::new(1, 0)));
        assert!(!map.recenter(ChunkCoord::new(1, 0)));
        assert!(map.is_inside_bounds(ChunkCoord::new(3, 0)));
        assert!(!map.is_inside_bounds(ChunkCoord::new(-2, 0)));
    }

    #[test]
    fn reconfigure_recomputes_only_on_change() {
        let mut map = Clipmap::new(params(1, 2), 8);
        assert!(!map.reconfigure(params(1, 2)));
        assert!(map.reconfigure(params(2, 3)));
        assert!(map.get(3, 3).in_cached_range);
    }
}
