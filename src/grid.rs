/// A square row-major grid. Unlike a world tilemap it never wraps:
/// coordinates outside the grid are simply absent.
#[derive(Clone, Debug)]
pub struct Grid<T> {
    pub size: usize,
    data: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn new_with(size: usize, value: T) -> Self {
        Self {
            size,
            data: vec![value; size * size],
        }
    }

    fn index(&self, x: usize, y: usize) -> usize {
        y * self.size + x
    }

    /// Whether (x, y) addresses a cell of this grid.
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.size && y < self.size
    }

    /// Bounds-checked read.
    pub fn try_get(&self, x: usize, y: usize) -> Option<&T> {
        if self.contains(x, y) {
            Some(&self.data[self.index(x, y)])
        } else {
            None
        }
    }

    /// Read a cell. Panics when out of range; use `try_get` for untrusted input.
    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[self.index(x, y)]
    }

    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        let idx = self.index(x, y);
        &mut self.data[idx]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    /// Fill the entire grid with a value.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Orthogonal neighbors at distance `step` that fall inside the grid.
    /// Yields between 2 and 4 coordinates for interior and edge cells.
    pub fn orthogonal_at(&self, x: usize, y: usize, step: usize) -> impl Iterator<Item = (usize, usize)> {
        let size = self.size;
        [
            (x >= step).then(|| (x - step, y)),
            (x + step < size).then(|| (x + step, y)),
            (y >= step).then(|| (x, y - step)),
            (y + step < size).then(|| (x, y + step)),
        ]
        .into_iter()
        .flatten()
    }

    /// Iterate over all cells with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        let size = self.size;
        self.data.iter().enumerate().map(move |(idx, val)| {
            let x = idx % size;
            let y = idx / size;
            (x, y, val)
        })
    }

    /// Iterate mutably over all cells with their coordinates.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, usize, &mut T)> {
        let size = self.size;
        self.data.iter_mut().enumerate().map(move |(idx, val)| {
            let x = idx % size;
            let y = idx / size;
            (x, y, val)
        })
    }

    /// Raw row-major cell slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_get_bounds() {
        let grid = Grid::new_with(5, 0.25f32);
        assert_eq!(grid.try_get(4, 4), Some(&0.25));
        assert_eq!(grid.try_get(5, 0), None);
        assert_eq!(grid.try_get(0, 5), None);
    }

    #[test]
    fn test_orthogonal_counts() {
        let grid = Grid::new_with(5, 0.0f32);
        // Corner cell at step 2 sees two neighbors, edge three, center four
        assert_eq!(grid.orthogonal_at(0, 0, 2).count(), 2);
        assert_eq!(grid.orthogonal_at(2, 0, 2).count(), 3);
        assert_eq!(grid.orthogonal_at(2, 2, 2).count(), 4);
    }

    #[test]
    fn test_iter_coordinates() {
        let mut grid = Grid::new_with(3, 0u32);
        grid.set(2, 1, 7);
        let found: Vec<_> = grid.iter().filter(|(_, _, &v)| v == 7).map(|(x, y, _)| (x, y)).collect();
        assert_eq!(found, vec![(2, 1)]);
    }
}
