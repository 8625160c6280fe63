pub use jirai_protocol::{Coord, Coord2};

const DISPLACEMENTS: [(Coord, Coord); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Applies `delta` to `coords`, returning a value only when it does not
/// overflow the coordinate type. The grid itself is unbounded.
fn apply_delta(coords: Coord2, delta: (Coord, Coord)) -> Option<Coord2> {
    let (x, y) = coords;
    let (dx, dy) = delta;
    Some((x.checked_add(dx)?, y.checked_add(dy)?))
}

/// Iterator over the 8-neighborhood of a cell.
#[derive(Debug)]
pub struct NeighborIter {
    center: Coord2,
    index: u8,
}

impl NeighborIter {
    pub(crate) fn new(center: Coord2) -> Self {
        Self { center, index: 0 }
    }
}

impl Iterator for NeighborIter {
    type Item = Coord2;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if usize::from(self.index) >= DISPLACEMENTS.len() {
                return None;
            }

            let next_item = apply_delta(self.center, DISPLACEMENTS[self.index as usize]);
            self.index += 1;

            if next_item.is_some() {
                return next_item;
            }
        }
    }
}

pub fn iter_neighbors(center: Coord2) -> NeighborIter {
    NeighborIter::new(center)
}

/// Iterator over every cell within Chebyshev distance `radius` of `center`,
/// excluding the center itself.
#[derive(Debug)]
pub struct SquareIter {
    center: Coord2,
    radius: Coord,
    dx: Coord,
    dy: Coord,
}

impl SquareIter {
    pub(crate) fn new(center: Coord2, radius: Coord) -> Self {
        Self {
            center,
            radius,
            dx: -radius,
            dy: -radius,
        }
    }
}

impl Iterator for SquareIter {
    type Item = Coord2;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.dy > self.radius {
                return None;
            }

            let delta = (self.dx, self.dy);
            if self.dx == self.radius {
                self.dx = -self.radius;
                self.dy += 1;
            } else {
                self.dx += 1;
            }

            if delta == (0, 0) {
                continue;
            }
            if let Some(coords) = apply_delta(self.center, delta) {
                return Some(coords);
            }
        }
    }
}

pub fn iter_square(center: Coord2, radius: Coord) -> SquareIter {
    SquareIter::new(center, radius)
}

pub fn chebyshev(a: Coord2, b: Coord2) -> u32 {
    let dx = a.0.abs_diff(b.0);
    let dy = a.1.abs_diff(b.1);
    dx.max(dy)
}

/// Chunk containing a world coordinate, for a given chunk side length.
pub fn world_to_chunk((x, y): Coord2, chunk_size: Coord) -> Coord2 {
    (x.div_euclid(chunk_size), y.div_euclid(chunk_size))
}

/// World coordinate of a chunk's lowest corner, or `None` for chunk keys
/// whose cells lie outside the coordinate range. Keys come straight off
/// the wire, so this must not assume they are sane.
pub fn chunk_origin((cx, cy): Coord2, chunk_size: Coord) -> Option<Coord2> {
    Some((cx.checked_mul(chunk_size)?, cy.checked_mul(chunk_size)?))
}
