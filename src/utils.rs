use crate::backend::CopyShape;
use core::ptr;

#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Copy the bytes described by `shape` from `src` to `dst`.
///
/// # Safety
/// Both regions must be valid for the spans reported by `shape`.
pub(crate) unsafe fn strided_copy(src: *const u8, dst: *mut u8, shape: CopyShape) {
    match shape {
        CopyShape::Linear { len_byte } => {
            // SAFETY: upheld by the caller.
            unsafe { ptr::copy(src, dst, len_byte) };
        }
        CopyShape::Planar {
            rows,
            len_byte,
            src_stride,
            dst_stride,
        } => {
            for row in 0..rows {
                // SAFETY: upheld by the caller.
                unsafe {
                    ptr::copy(
                        src.add(row * src_stride),
                        dst.add(row * dst_stride),
                        len_byte,
                    );
                }
            }
        }
        CopyShape::Volume {
            i_loop,
            j_loop,
            len_byte,
            i_src_stride,
            j_src_stride,
            i_dst_stride,
            j_dst_stride,
        } => {
            for i in 0..i_loop {
                for j in 0..j_loop {
                    // SAFETY: upheld by the caller.
                    unsafe {
                        ptr::copy(
                            src.add(i * i_src_stride + j * j_src_stride),
                            dst.add(i * i_dst_stride + j * j_dst_stride),
                            len_byte,
                        );
                    }
                }
            }
        }
    }
}
