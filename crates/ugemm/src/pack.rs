//! Host side packing of the B operand into the layout a selected kernel reads.

use half::bf16;

use crate::config::LayoutType;

/// Elements needed to hold a `k x n` B block packed in `layout`, with k padded
/// up to the vnni granularity.
pub fn b_size_packed(layout: LayoutType, k: usize, n: usize) -> usize {
    let vnni = layout.vnni_size();
    (k + vnni - 1) / vnni * vnni * n
}

/// Packs the row major `k x n` block `b` (row stride `ldb`) into `bp`.
///
/// `Normal` is a dense copy with row stride `n`. In the vnni layouts each group
/// of `v` consecutive k rows is interleaved so that element `(kb * v + t, j)`
/// lands at `(kb * n + j) * v + t`; rows past `k` in the last group are zero.
///
/// # Panics
///
/// When `b` holds fewer than `(k - 1) * ldb + n` elements or `bp` is smaller
/// than [`b_size_packed`].
pub fn pack_b<T: Copy + Default>(layout: LayoutType, k: usize, n: usize, b: &[T], ldb: usize, bp: &mut [T]) {
    assert!(ldb >= n, "ldb {ldb} is smaller than n {n}");
    assert!(k == 0 || b.len() >= (k - 1) * ldb + n, "b holds {} elements, k={k} n={n} ldb={ldb}", b.len());
    let size = b_size_packed(layout, k, n);
    assert!(bp.len() >= size, "packed buffer holds {} elements, need {size}", bp.len());

    let vnni = layout.vnni_size();
    let k_groups = (k + vnni - 1) / vnni;
    for kb in 0..k_groups {
        for t in 0..vnni {
            let row = kb * vnni + t;
            for j in 0..n {
                bp[(kb * n + j) * vnni + t] = if row < k { b[row * ldb + j] } else { T::default() };
            }
        }
    }
}

/// Widens int8 weights to bf16, the same conversion the tiled kernels apply
/// to their cached B slab.
pub fn dequantize_i8(b: &[i8]) -> Vec<bf16> {
    b.iter().map(|&v| bf16::from_f32(f32::from(v))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aligned_vec::avec;
    use ugemm_dev::{gemm_reference, generate_k_dims, generate_m_dims, generate_n_dims, max_abs_diff, random_matrix_uniform};

    const AB_ALIGN: usize = 64;

    #[test]
    fn test_pack_normal() {
        let (k, n, ldb) = (3, 4, 6);
        let b: Vec<i32> = (0..(k * ldb) as i32).collect();
        let mut bp = avec![[AB_ALIGN]| 0; b_size_packed(LayoutType::Normal, k, n)];
        pack_b(LayoutType::Normal, k, n, &b, ldb, &mut bp);
        assert_eq!(&bp[..], &[0, 1, 2, 3, 6, 7, 8, 9, 12, 13, 14, 15]);
    }

    #[test]
    fn test_pack_vnni2_pads_k() {
        let (k, n) = (3, 2);
        let b: Vec<i32> = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(b_size_packed(LayoutType::Vnni2, k, n), 8);
        let mut bp = avec![[AB_ALIGN]| -1; 8];
        pack_b(LayoutType::Vnni2, k, n, &b, n, &mut bp);
        // rows (1, 2) | (3, 4) interleaved, then row (5, 6) with a zero pair
        assert_eq!(&bp[..], &[1, 3, 2, 4, 5, 0, 6, 0]);
    }

    #[test]
    fn test_pack_vnni4() {
        let n = 16;
        for k in generate_k_dims(64, 4) {
            let ldb = n + 3;
            let b: Vec<i8> = (0..k * ldb).map(|i| (i % 127) as i8).collect();
            let size = b_size_packed(LayoutType::Vnni4, k, n);
            assert_eq!(size % (4 * n), 0);
            let mut bp = avec![[AB_ALIGN]| 0i8; size];
            pack_b(LayoutType::Vnni4, k, n, &b, ldb, &mut bp);
            for row in 0..k {
                for j in 0..n {
                    assert_eq!(bp[(row / 4 * n + j) * 4 + row % 4], b[row * ldb + j], "k={k} row={row} j={j}");
                }
            }
            let padded = size / n;
            for row in k..padded {
                assert!((0..n).all(|j| bp[(row / 4 * n + j) * 4 + row % 4] == 0));
            }
        }
    }

    #[test]
    #[should_panic(expected = "packed buffer holds")]
    fn test_pack_short_output() {
        let b = vec![0.0f32; 8];
        let mut bp = vec![0.0f32; 4];
        pack_b(LayoutType::Vnni2, 3, 2, &b, 2, &mut bp);
    }

    #[test]
    fn test_vnni2_gemm_matches_reference() {
        let n = 32;
        for (k, m) in generate_k_dims(16, 2).into_iter().zip(generate_m_dims(8, 3).into_iter().cycle()) {
            let mut a = vec![bf16::ZERO; m * k];
            let mut b = vec![0i8; k * n];
            random_matrix_uniform(k, m, &mut a, k);
            random_matrix_uniform(n, k, &mut b, n);

            let b_deq = dequantize_i8(&b);
            let mut bp = avec![[AB_ALIGN]| bf16::ZERO; b_size_packed(LayoutType::Vnni2, k, n)];
            pack_b(LayoutType::Vnni2, k, n, &b_deq, n, &mut bp);

            let mut c = vec![0.0f64; m * n];
            for i in 0..m {
                for j in 0..n {
                    c[i * n + j] = (0..k).map(|p| f64::from(a[i * k + p]) * f64::from(bp[(p / 2 * n + j) * 2 + p % 2])).sum();
                }
            }
            let mut c_ref = vec![0.0f64; m * n];
            gemm_reference(m, n, k, 1.0, &a, k, &b, n, &mut c_ref, n, false);
            assert!(max_abs_diff(&c, &c_ref) < 1e-9, "m={m} k={k}");
        }
    }

    #[test]
    fn test_pack_strided_widths() {
        let k = 5;
        for n in generate_n_dims(16, 3) {
            let ldb = n + 3;
            let b: Vec<i32> = (0..(k * ldb) as i32).collect();
            for layout in [LayoutType::Normal, LayoutType::Vnni2, LayoutType::Vnni4] {
                let v = layout.vnni_size();
                let mut bp = avec![[AB_ALIGN]| -1; b_size_packed(layout, k, n)];
                pack_b(layout, k, n, &b, ldb, &mut bp);
                for row in 0..(k + v - 1) / v * v {
                    for j in 0..n {
                        let expected = if row < k { b[row * ldb + j] } else { 0 };
                        assert_eq!(bp[(row / v * n + j) * v + row % v], expected, "{layout:?} n={n} row={row} j={j}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_dequantize() {
        let q: Vec<i8> = vec![-128, -1, 0, 1, 127];
        let dq: Vec<f32> = dequantize_i8(&q).into_iter().map(f32::from).collect();
        assert_eq!(dq, vec![-128.0, -1.0, 0.0, 1.0, 127.0]);
    }
}
