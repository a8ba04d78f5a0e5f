pub mod conv2d_norm;
pub mod norm_conv2d;
pub mod padding;
pub mod spatial_dropout;
