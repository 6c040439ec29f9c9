//! Row-major dense matrix used by every stage of the amplifier.
//!
//! Storage, indexing, range copies and padding are generic over the sample type so
//! the same container holds `f32` heights and `u8` selection hints. Arithmetic,
//! reductions, multiplication and the binary codec are `f32` only.
//!
//! Range arguments accept any `RangeBounds<usize>`. The full range `..` selects the
//! whole axis without the caller knowing its length. Range accessors always return
//! owned copies.

use std::io::{self, Read, Write};
use std::ops::{
    Add, AddAssign, Bound, Deref, DerefMut, Div, Index, IndexMut, Mul, MulAssign, Range,
    RangeBounds, Sub,
};

use rayon::prelude::*;

use crate::error::{Error, Result};


#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T = f32> {
    values: Vec<T>,
    rows: usize,
    columns: usize,
}

/// Converts range bounds on an axis of length `len` into a half-open range.
fn resolve<R: RangeBounds<usize>>(range: R, len: usize) -> Range<usize> {
    let start = match range.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s + 1,
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&e) => e + 1,
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    };
    assert!(
        start <= end && end <= len,
        "range {start}..{end} out of bounds for axis of length {len}"
    );
    start..end
}

impl<T> Matrix<T> {
    pub fn new(rows: usize, columns: usize, values: Vec<T>) -> Self {
        assert_eq!(
            values.len(),
            rows * columns,
            "values length must equal rows * columns"
        );
        Self {
            values,
            rows,
            columns,
        }
    }

    /// Builds a matrix by calling `f` with every linear index in row-major order.
    pub fn from_fn<F>(rows: usize, columns: usize, f: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        Self {
            values: (0..rows * columns).map(f).collect(),
            rows,
            columns,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    #[inline]
    pub fn offset(&self, row: usize, column: usize) -> usize {
        debug_assert!(row < self.rows && column < self.columns);
        row * self.columns + column
    }

    #[inline]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.values
    }

    #[inline]
    pub fn row_slice(&self, row: usize) -> &[T] {
        &self.values[row * self.columns..(row + 1) * self.columns]
    }

    #[inline]
    pub fn row_slice_mut(&mut self, row: usize) -> &mut [T] {
        &mut self.values[row * self.columns..(row + 1) * self.columns]
    }
}

impl<T: Default + Clone> Matrix<T> {
    pub fn new_default(rows: usize, columns: usize) -> Self {
        Self::new_filled(rows, columns, T::default())
    }
}

impl<T: Clone> Matrix<T> {
    pub fn new_filled(rows: usize, columns: usize, value: T) -> Self {
        Self {
            values: vec![value; rows * columns],
            rows,
            columns,
        }
    }
}

impl<T: Copy> Matrix<T> {
    #[inline]
    pub fn get(&self, row: usize, column: usize) -> T {
        self.values[self.offset(row, column)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, column: usize, value: T) {
        let i = self.offset(row, column);
        self.values[i] = value;
    }

    #[inline]
    pub fn get_at(&self, i: usize) -> T {
        self.values[i]
    }

    #[inline]
    pub fn set_at(&mut self, i: usize, value: T) {
        self.values[i] = value;
    }

    /// Copies the rectangle `rows x columns` into a new matrix.
    pub fn slice_get<R, C>(&self, rows: R, columns: C) -> Matrix<T>
    where
        R: RangeBounds<usize>,
        C: RangeBounds<usize>,
    {
        let rows = resolve(rows, self.rows);
        let columns = resolve(columns, self.columns);
        let width = columns.len();
        let mut values = Vec::with_capacity(rows.len() * width);
        for row in rows.clone() {
            let start = row * self.columns;
            values.extend_from_slice(&self.values[start + columns.start..start + columns.end]);
        }
        Matrix::new(rows.len(), width, values)
    }

    /// Copy of one row as a `1 x columns` matrix.
    pub fn row(&self, row: usize) -> Matrix<T> {
        self.slice_get(row..row + 1, ..)
    }

    /// Copy of one column as a `rows x 1` matrix.
    pub fn column(&self, column: usize) -> Matrix<T> {
        self.slice_get(.., column..column + 1)
    }

    /// Overwrites the rectangle `rows x columns` with the contents of `source`.
    pub fn slice_set<R, C>(&mut self, rows: R, columns: C, source: &Matrix<T>)
    where
        R: RangeBounds<usize>,
        C: RangeBounds<usize>,
    {
        let rows = resolve(rows, self.rows);
        let columns = resolve(columns, self.columns);
        assert_eq!(
            (rows.len(), columns.len()),
            (source.rows, source.columns),
            "slice_set source shape mismatch"
        );
        for (source_row, row) in rows.enumerate() {
            let start = row * self.columns;
            self.values[start + columns.start..start + columns.end]
                .copy_from_slice(source.row_slice(source_row));
        }
    }

    /// Grows the matrix by `margin` on every side, replicating the nearest edge sample.
    pub fn padded(&self, margin: usize) -> Matrix<T> {
        assert!(
            self.rows > 0 && self.columns > 0,
            "cannot pad an empty matrix"
        );
        let rows = self.rows + 2 * margin;
        let columns = self.columns + 2 * margin;
        Matrix::from_fn(rows, columns, |i| {
            let row = (i / columns).saturating_sub(margin).min(self.rows - 1);
            let column = (i % columns).saturating_sub(margin).min(self.columns - 1);
            self.values[row * self.columns + column]
        })
    }
}

impl Matrix<f32> {
    pub fn zeros(rows: usize, columns: usize) -> Self {
        Self::new_default(rows, columns)
    }

    /// Mean over a rectangle, accumulated in f64. NaN for an empty rectangle.
    pub fn mean_range<R, C>(&self, rows: R, columns: C) -> f32
    where
        R: RangeBounds<usize>,
        C: RangeBounds<usize>,
    {
        let rows = resolve(rows, self.rows);
        let columns = resolve(columns, self.columns);
        let count = rows.len() * columns.len();
        if count == 0 {
            return f32::NAN;
        }
        (self.sum_resolved(rows, columns) / count as f64) as f32
    }

    pub fn sum_range<R, C>(&self, rows: R, columns: C) -> f32
    where
        R: RangeBounds<usize>,
        C: RangeBounds<usize>,
    {
        let rows = resolve(rows, self.rows);
        let columns = resolve(columns, self.columns);
        self.sum_resolved(rows, columns) as f32
    }

    fn sum_resolved(&self, rows: Range<usize>, columns: Range<usize>) -> f64 {
        rows.map(|row| {
            let start = row * self.columns;
            self.values[start + columns.start..start + columns.end]
                .iter()
                .map(|&v| v as f64)
                .sum::<f64>()
        })
        .sum()
    }

    pub fn row_sum<C: RangeBounds<usize>>(&self, row: usize, columns: C) -> f32 {
        self.sum_range(row..row + 1, columns)
    }

    pub fn column_sum<R: RangeBounds<usize>>(&self, rows: R, column: usize) -> f32 {
        self.sum_range(rows, column..column + 1)
    }

    /// Euclidean norm of part of a row.
    pub fn row_norm<C: RangeBounds<usize>>(&self, row: usize, columns: C) -> f32 {
        let columns = resolve(columns, self.columns);
        let start = row * self.columns;
        let sum: f64 = self.values[start + columns.start..start + columns.end]
            .iter()
            .map(|&v| (v as f64) * (v as f64))
            .sum();
        sum.sqrt() as f32
    }

    /// Euclidean norm of part of a column.
    pub fn column_norm<R: RangeBounds<usize>>(&self, rows: R, column: usize) -> f32 {
        let rows = resolve(rows, self.rows);
        let sum: f64 = rows
            .map(|row| {
                let v = self.values[row * self.columns + column] as f64;
                v * v
            })
            .sum();
        sum.sqrt() as f32
    }

    pub fn mean(&self) -> f32 {
        self.mean_range(.., ..)
    }

    /// Smallest sample, NaN when empty.
    pub fn min(&self) -> f32 {
        self.values.iter().copied().reduce(f32::min).unwrap_or(f32::NAN)
    }

    /// Largest sample, NaN when empty.
    pub fn max(&self) -> f32 {
        self.values.iter().copied().reduce(f32::max).unwrap_or(f32::NAN)
    }

    /// Like [`Matrix::slice_get`], multiplying every copied sample by `alpha`.
    pub fn slice_get_scaled<R, C>(&self, rows: R, columns: C, alpha: f32) -> Matrix
    where
        R: RangeBounds<usize>,
        C: RangeBounds<usize>,
    {
        let mut slice = self.slice_get(rows, columns);
        slice *= alpha;
        slice
    }

    pub fn transpose(&self) -> Matrix {
        let mut output = Matrix::zeros(self.columns, self.rows);
        for row in 0..self.rows {
            for column in 0..self.columns {
                output.values[column * self.rows + row] = self.values[row * self.columns + column];
            }
        }
        output
    }

    /// Transpose with output rows filled in parallel.
    pub fn par_transpose(&self) -> Matrix {
        let mut output = Matrix::zeros(self.columns, self.rows);
        if output.values.is_empty() {
            return output;
        }
        let rows = self.rows;
        output
            .values
            .par_chunks_mut(rows)
            .enumerate()
            .for_each(|(column, out_row)| {
                for (row, out) in out_row.iter_mut().enumerate() {
                    *out = self.values[row * self.columns + column];
                }
            });
        output
    }

    /// Matrix product. Zero entries on the left-hand side are skipped.
    pub fn mat_mul(&self, other: &Matrix) -> Matrix {
        self.assert_mul_shape(other);
        let mut output = Matrix::zeros(self.rows, other.columns);
        if output.values.is_empty() {
            return output;
        }
        for (row, out_row) in output.values.chunks_mut(other.columns).enumerate() {
            accumulate_product_row(self.row_slice(row), other, out_row);
        }
        output
    }

    /// [`Matrix::mat_mul`] with output rows computed in parallel.
    pub fn par_mat_mul(&self, other: &Matrix) -> Matrix {
        self.assert_mul_shape(other);
        let mut output = Matrix::zeros(self.rows, other.columns);
        if output.values.is_empty() {
            return output;
        }
        output
            .values
            .par_chunks_mut(other.columns)
            .enumerate()
            .for_each(|(row, out_row)| {
                accumulate_product_row(self.row_slice(row), other, out_row);
            });
        output
    }

    fn assert_mul_shape(&self, other: &Matrix) {
        assert_eq!(
            self.columns, other.rows,
            "A.columns {} did not match B.rows {}",
            self.columns, other.rows
        );
    }

    /// Re-reads the samples in column-major order into a `rows x columns` matrix.
    /// Turns an atom column of `size * size` samples into its square patch.
    pub fn reshape(&self, rows: usize, columns: usize) -> Matrix {
        assert_eq!(
            rows * columns,
            self.values.len(),
            "reshape must preserve the sample count"
        );
        let mut output = Matrix::zeros(rows, columns);
        for row in 0..rows {
            for column in 0..columns {
                let j = column * rows + row;
                output.values[row * columns + column] =
                    self.values[(j % self.rows) * self.columns + j / self.rows];
            }
        }
        output
    }

    /// Rotates a square matrix a quarter turn clockwise in place.
    pub fn rotate_90_clockwise(&mut self) {
        assert_eq!(self.rows, self.columns, "rows must equal columns");
        let n = self.rows;
        for i in 0..n / 2 {
            for j in i..n - i - 1 {
                let last = n - 1;
                let temp = self.get(i, j);
                self.set(i, j, self.get(last - j, i));
                self.set(last - j, i, self.get(last - i, last - j));
                self.set(last - i, last - j, self.get(j, last - i));
                self.set(j, last - i, temp);
            }
        }
    }

    /// Box-filter reduction by an integer factor. Trailing partial blocks are dropped.
    pub fn downscale(&self, factor: usize) -> Matrix {
        assert!(factor > 0, "factor must be > 0");
        let rows = self.rows / factor;
        let columns = self.columns / factor;
        let area = (factor * factor) as f32;
        Matrix::from_fn(rows, columns, |i| {
            let (row, column) = (i / columns, i % columns);
            let mut sum = 0.0f32;
            for r in row * factor..(row + 1) * factor {
                let start = r * self.columns + column * factor;
                sum += self.values[start..start + factor].iter().sum::<f32>();
            }
            sum / area
        })
    }

    /// Writes `i32 rows, i32 columns, rows * columns f32` big-endian, row-major.
    pub fn write_to<W: Write>(&self, output: &mut W) -> io::Result<()> {
        write_i32(output, self.rows)?;
        write_i32(output, self.columns)?;
        let mut bytes = Vec::with_capacity(self.values.len() * 4);
        for value in &self.values {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        output.write_all(&bytes)
    }

    /// Inverse of [`Matrix::write_to`].
    pub fn read_from<R: Read>(input: &mut R) -> Result<Matrix> {
        let rows = read_dimension(input)?;
        let columns = read_dimension(input)?;
        let byte_len = rows
            .checked_mul(columns)
            .and_then(|len| len.checked_mul(4))
            .ok_or_else(|| Error::Format(format!("matrix {rows}x{columns} is too large")))?;

        // Grow with the data instead of trusting the header for the allocation size.
        let mut bytes = Vec::new();
        input
            .by_ref()
            .take(byte_len as u64)
            .read_to_end(&mut bytes)?;
        if bytes.len() != byte_len {
            return Err(Error::Format(format!(
                "matrix {rows}x{columns} truncated after {} of {byte_len} bytes",
                bytes.len()
            )));
        }

        let values = bytes
            .chunks_exact(4)
            .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Matrix::new(rows, columns, values))
    }
}

fn accumulate_product_row(lhs_row: &[f32], rhs: &Matrix, out_row: &mut [f32]) {
    for (k, &lhs) in lhs_row.iter().enumerate() {
        if lhs == 0.0 {
            continue;
        }
        for (out, &rhs) in out_row.iter_mut().zip(rhs.row_slice(k)) {
            *out += lhs * rhs;
        }
    }
}

pub(crate) fn write_i32<W: Write>(output: &mut W, value: usize) -> io::Result<()> {
    let value = i32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{value} does not fit in i32"),
        )
    })?;
    output.write_all(&value.to_be_bytes())
}

pub(crate) fn read_i32<R: Read>(input: &mut R) -> Result<i32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(i32::from_be_bytes(bytes))
}

pub(crate) fn read_dimension<R: Read>(input: &mut R) -> Result<usize> {
    let value = read_i32(input)?;
    usize::try_from(value).map_err(|_| Error::Format(format!("negative dimension {value}")))
}

pub(crate) fn write_bool<W: Write>(output: &mut W, value: bool) -> io::Result<()> {
    output.write_all(&[u8::from(value)])
}

pub(crate) fn read_bool<R: Read>(input: &mut R) -> Result<bool> {
    let mut byte = [0u8; 1];
    input.read_exact(&mut byte)?;
    match byte[0] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::Format(format!("invalid boolean byte {other}"))),
    }
}

macro_rules! elementwise_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait<&Matrix<f32>> for &Matrix<f32> {
            type Output = Matrix<f32>;

            fn $method(self, other: &Matrix<f32>) -> Matrix<f32> {
                assert_eq!(
                    (self.rows, self.columns),
                    (other.rows, other.columns),
                    concat!("shape mismatch in elementwise ", stringify!($method))
                );
                Matrix {
                    values: self
                        .values
                        .iter()
                        .zip(&other.values)
                        .map(|(a, b)| a $op b)
                        .collect(),
                    rows: self.rows,
                    columns: self.columns,
                }
            }
        }

        impl $trait<f32> for &Matrix<f32> {
            type Output = Matrix<f32>;

            fn $method(self, scalar: f32) -> Matrix<f32> {
                Matrix {
                    values: self.values.iter().map(|a| a $op scalar).collect(),
                    rows: self.rows,
                    columns: self.columns,
                }
            }
        }
    };
}

elementwise_op!(Add, add, +);
elementwise_op!(Sub, sub, -);
elementwise_op!(Mul, mul, *);
elementwise_op!(Div, div, /);

impl AddAssign<&Matrix<f32>> for Matrix<f32> {
    fn add_assign(&mut self, other: &Matrix<f32>) {
        assert_eq!(
            (self.rows, self.columns),
            (other.rows, other.columns),
            "shape mismatch in elementwise add_assign"
        );
        for (a, &b) in self.values.iter_mut().zip(&other.values) {
            *a += b;
        }
    }
}

impl MulAssign<f32> for Matrix<f32> {
    fn mul_assign(&mut self, scalar: f32) {
        for a in &mut self.values {
            *a *= scalar;
        }
    }
}

impl<T> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    #[inline]
    fn index(&self, (row, column): (usize, usize)) -> &Self::Output {
        &self.values[row * self.columns + column]
    }
}

impl<T> IndexMut<(usize, usize)> for Matrix<T> {
    #[inline]
    fn index_mut(&mut self, (row, column): (usize, usize)) -> &mut Self::Output {
        &mut self.values[row * self.columns + column]
    }
}

impl<T> Index<usize> for Matrix<T> {
    type Output = T;

    #[inline]
    fn index(&self, i: usize) -> &Self::Output {
        &self.values[i]
    }
}

impl<T> IndexMut<usize> for Matrix<T> {
    #[inline]
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.values[i]
    }
}

impl<T> Deref for Matrix<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl<T> DerefMut for Matrix<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.values
    }
}

impl<T> From<Matrix<T>> for Vec<T> {
    #[inline]
    fn from(matrix: Matrix<T>) -> Self {
        matrix.values
    }
}
