use burn::prelude::*;

/// Leading and trailing zeros needed along one axis so that a valid
/// convolution yields `ceil(size / stride)` outputs. An odd total puts the
/// extra zero at the end.
pub fn same_padding(size: usize, kernel_size: usize, stride: usize) -> (usize, usize) {
    let output = size.div_ceil(stride);
    let total = (output.saturating_sub(1) * stride + kernel_size).saturating_sub(size);

    (total / 2, total - total / 2)
}

/// Zero-pads a `[batch, channels, height, width]` tensor for a "same"
/// convolution with the given kernel and stride.
pub fn pad_same<B: Backend>(
    x: Tensor<B, 4>,
    kernel_size: [usize; 2],
    stride: [usize; 2],
) -> Tensor<B, 4> {
    let [batch_size, channels, height, width] = x.dims();
    let (top, bottom) = same_padding(height, kernel_size[0], stride[0]);
    let (left, right) = same_padding(width, kernel_size[1], stride[1]);

    if top + bottom + left + right == 0 {
        return x;
    }

    let device = x.device();
    Tensor::zeros(
        [batch_size, channels, top + height + bottom, left + width + right],
        &device,
    )
    .slice_assign(
        [
            0..batch_size,
            0..channels,
            top..top + height,
            left..left + width,
        ],
        x,
    )
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    #[test]
    fn even_inputs_at_stride_two_pad_only_after() {
        assert_eq!(same_padding(28, 3, 2), (0, 1));
        assert_eq!(same_padding(14, 3, 2), (0, 1));
        assert_eq!(same_padding(7, 3, 2), (1, 1));
        assert_eq!(same_padding(28, 3, 1), (1, 1));
        assert_eq!(same_padding(4, 1, 1), (0, 0));
    }

    #[test]
    fn pads_trailing_row_and_column() {
        let device = Default::default();
        let x = Tensor::<NdArray, 4>::ones([1, 1, 4, 4], &device);

        let padded = pad_same(x, [3, 3], [2, 2]);

        assert_eq!(padded.dims(), [1, 1, 5, 5]);
        let values = padded.into_data().to_vec::<f32>().unwrap();
        // first row untouched, last row and column zero
        assert_eq!(&values[0..5], &[1.0, 1.0, 1.0, 1.0, 0.0]);
        assert_eq!(&values[20..25], &[0.0; 5]);
    }
}
