//! 2D rotation and transformation utilities.
//!
//! A tetromino lying flat on the sheet has four orientations, one per
//! quarter turn. Coordinates are `(x, y)` with `x` growing to the right
//! (columns) and `y` growing downwards (rows).

/// A 2D cell offset: `(x, y)` = `(column, row)`.
pub type Coord = (i32, i32);

/// Number of quarter-turn orientations.
pub const NUM_ROTATIONS: usize = 4;

/// Rotates a coordinate by one quarter turn.
#[inline]
pub const fn rotate_quarter((x, y): Coord) -> Coord {
    (y, -x)
}

/// Reflects a coordinate across the vertical axis.
#[inline]
pub const fn mirror_x((x, y): Coord) -> Coord {
    (-x, y)
}

/// Generates the four quarter-turn orientations of a piece, in order.
///
/// Each orientation is normalized to the origin and sorted, so two
/// orientations that differ only by translation compare equal. The result
/// is not deduplicated: index `r` is always `r` quarter turns from the
/// reference.
pub fn all_orientations(piece: &[Coord]) -> Vec<Vec<Coord>> {
    let mut current = piece.to_vec();
    let mut orientations = Vec::with_capacity(NUM_ROTATIONS);

    for _ in 0..NUM_ROTATIONS {
        orientations.push(normalize_to_origin(current.clone()));
        current = current.into_iter().map(rotate_quarter).collect();
    }

    orientations
}

/// Translates coordinates so the minimum x and y values are zero, then
/// sorts them in row-major order.
///
/// Returns an empty vector for empty input.
pub fn normalize_to_origin(mut coords: Vec<Coord>) -> Vec<Coord> {
    let Some(min_x) = coords.iter().map(|(x, _)| *x).min() else {
        return coords;
    };
    let min_y = coords.iter().map(|(_, y)| *y).min().unwrap_or(0);

    for (x, y) in &mut coords {
        *x -= min_x;
        *y -= min_y;
    }

    coords.sort_by_key(|&(x, y)| (y, x));
    coords
}

/// Offsets within `radius` of the origin, closest first.
///
/// Ties in (squared) distance are broken by angle, starting east and going
/// clockwise on screen. The origin itself comes first.
pub fn distance_ranking(radius: i32) -> Vec<Coord> {
    let mut offsets: Vec<Coord> = (-radius..=radius)
        .flat_map(|y| (-radius..=radius).map(move |x| (x, y)))
        .filter(|&(x, y)| x * x + y * y <= radius * radius)
        .collect();

    offsets.sort_by(|&a, &b| {
        let dist_a = a.0 * a.0 + a.1 * a.1;
        let dist_b = b.0 * b.0 + b.1 * b.1;
        dist_a
            .cmp(&dist_b)
            .then_with(|| angle(a).total_cmp(&angle(b)))
    });
    offsets
}

/// Absolute `(row, col)` cells around `center`, ranked by proximity and
/// clipped to a `width` x `height` grid.
pub fn ranked_offsets(
    ranking: &[Coord],
    center: (usize, usize),
    width: usize,
    height: usize,
) -> impl Iterator<Item = (usize, usize)> + '_ {
    let (row, col) = (center.0 as i32, center.1 as i32);
    ranking.iter().filter_map(move |&(dx, dy)| {
        let (r, c) = (row + dy, col + dx);
        if (0..height as i32).contains(&r) && (0..width as i32).contains(&c) {
            Some((r as usize, c as usize))
        } else {
            None
        }
    })
}

/// Angle in `[0, 2pi)` measured from the positive x axis.
fn angle((x, y): Coord) -> f64 {
    let theta = (y as f64).atan2(x as f64);
    if theta < 0.0 {
        theta + std::f64::consts::TAU
    } else {
        theta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_quarter_turns_are_identity() {
        let coord = (2, -3);
        let mut rotated = coord;
        for _ in 0..NUM_ROTATIONS {
            rotated = rotate_quarter(rotated);
        }
        assert_eq!(rotated, coord);
    }

    #[test]
    fn test_normalize_moves_to_origin_and_sorts() {
        let normalized = normalize_to_origin(vec![(3, 5), (2, 5), (2, 4)]);
        assert_eq!(normalized, vec![(0, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn test_orientations_of_bar_alternate() {
        let bar = [(0, 0), (1, 0), (2, 0), (3, 0)];
        let orientations = all_orientations(&bar);
        assert_eq!(orientations.len(), 4);
        assert_eq!(orientations[0], orientations[2]);
        assert_eq!(orientations[1], vec![(0, 0), (0, 1), (0, 2), (0, 3)]);
    }

    #[test]
    fn test_distance_ranking_starts_at_origin() {
        let ranking = distance_ranking(2);
        assert_eq!(ranking[0], (0, 0));
        // four unit neighbours, east first then clockwise on screen
        assert_eq!(&ranking[1..5], &[(1, 0), (0, 1), (-1, 0), (0, -1)]);
        assert!(ranking.contains(&(2, 0)));
        assert!(!ranking.contains(&(2, 2)));
    }

    #[test]
    fn test_ranked_offsets_clip_to_grid() {
        let ranking = distance_ranking(1);
        let cells: Vec<_> = ranked_offsets(&ranking, (0, 0), 3, 3).collect();
        assert_eq!(cells, vec![(0, 0), (0, 1), (1, 0)]);
    }
}
