use crate::config::Size;

/// `[left, top, right, bottom]`.
pub type BBox = [f64; 4];

/// Box after padding, carrying either truncated coordinates or a token id.
pub type TokenBox = [i64; 4];

/// Maps boxes from source pixels into the `box_size` coordinate space.
///
/// Left/top are only floored at 0 and right/bottom are only capped at the
/// box-space extent; the other two bounds are not enforced.
pub fn remap_boxes(boxes: &[BBox], (width, height): (u32, u32), box_size: Size) -> Vec<BBox> {
    let (width, height) = (f64::from(width), f64::from(height));
    let (box_w, box_h) = (f64::from(box_size.width), f64::from(box_size.height));

    boxes
        .iter()
        .map(|&[left, top, right, bottom]| {
            let left = left / width * box_w;
            let top = top / height * box_h;
            let right = right / width * box_w;
            let bottom = bottom / height * box_h;
            [left.max(0.0), top.max(0.0), right.min(box_w), bottom.min(box_h)]
        })
        .collect()
}

/// Left-padded box batch with a trailing separator per row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaddedBoxes {
    pub boxes: Vec<Vec<TokenBox>>,
    pub mask: Vec<Vec<u8>>,
    /// Box count per image before padding and separator.
    pub counts: Vec<usize>,
}

impl PaddedBoxes {
    /// Length shared by every row, `None` for an empty batch.
    pub fn row_len(&self) -> Option<usize> {
        self.boxes.first().map(Vec::len)
    }
}

/// Pads every box list to `max(count) + 1` entries.
///
/// Each row is `[pad; longest - count] ++ boxes ++ [sep]`; its mask is zeros over
/// the pad prefix and ones over the boxes and the separator. Coordinates are
/// truncated toward zero.
pub fn pad_boxes(boxes: &[Vec<BBox>], token_sep_id: i64, token_pad_id: i64) -> PaddedBoxes {
    let Some(longest) = boxes.iter().map(Vec::len).max() else {
        return PaddedBoxes::default();
    };
    let max_boxes = longest + 1;
    let sep = [token_sep_id; 4];
    let pad = [token_pad_id; 4];

    let mut padded = PaddedBoxes {
        boxes: Vec::with_capacity(boxes.len()),
        mask: Vec::with_capacity(boxes.len()),
        counts: Vec::with_capacity(boxes.len()),
    };

    for row in boxes {
        let count = row.len();
        let pad_len = max_boxes - count - 1;

        let mut tokens = Vec::with_capacity(max_boxes);
        tokens.extend(std::iter::repeat(pad).take(pad_len));
        tokens.extend(row.iter().map(|b| b.map(|v| v as i64)));
        tokens.push(sep);

        let mut mask = vec![0u8; pad_len];
        mask.resize(max_boxes, 1);

        padded.boxes.push(tokens);
        padded.mask.push(mask);
        padded.counts.push(count);
    }

    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEP: i64 = 1257;
    const PAD: i64 = 1258;

    #[test]
    fn test_remap_scales_into_box_space() {
        let boxes = [[50.0, 100.0, 150.0, 200.0]];
        let remapped = remap_boxes(&boxes, (200, 400), Size::square(1000));
        assert_eq!(remapped, vec![[250.0, 250.0, 750.0, 500.0]]);
    }

    #[test]
    fn test_remap_clamps_boundaries() {
        let boxes = [[-10.0, -5.0, 250.0, 450.0]];
        let remapped = remap_boxes(&boxes, (200, 400), Size::square(1000));
        assert_eq!(remapped, vec![[0.0, 0.0, 1000.0, 1000.0]]);
    }

    #[test]
    fn test_remap_clamp_is_asymmetric() {
        // left beyond width and right below zero are kept as computed
        let boxes = [[300.0, 500.0, -20.0, -40.0]];
        let remapped = remap_boxes(&boxes, (200, 400), Size::square(1000));
        assert_eq!(remapped, vec![[1500.0, 1250.0, -100.0, -100.0]]);
    }

    #[test]
    fn test_remap_does_not_touch_input() {
        let boxes = vec![[10.0, 10.0, 20.0, 20.0]];
        let _ = remap_boxes(&boxes, (100, 100), Size::square(1000));
        assert_eq!(boxes, vec![[10.0, 10.0, 20.0, 20.0]]);
    }

    #[test]
    fn test_pad_boxes_mixed_counts() {
        let row = |n: usize| vec![[1.0, 2.0, 3.0, 4.0]; n];
        let padded = pad_boxes(&[row(2), row(5), row(0)], SEP, PAD);

        assert_eq!(padded.row_len(), Some(6));
        assert!(padded.boxes.iter().all(|r| r.len() == 6));
        assert_eq!(padded.counts, vec![2, 5, 0]);

        assert_eq!(padded.mask[0], vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(padded.mask[1], vec![1; 6]);
        assert_eq!(padded.mask[2], vec![0, 0, 0, 0, 0, 1]);

        assert_eq!(padded.boxes[0][0], [PAD; 4]);
        assert_eq!(padded.boxes[0][3], [1, 2, 3, 4]);
        assert_eq!(padded.boxes[0][5], [SEP; 4]);
        assert_eq!(padded.boxes[2], {
            let mut r = vec![[PAD; 4]; 5];
            r.push([SEP; 4]);
            r
        });
    }

    #[test]
    fn test_pad_boxes_longest_row_has_no_pad() {
        let padded = pad_boxes(&[vec![[0.0; 4]; 5], vec![]], SEP, PAD);
        assert_eq!(padded.mask[0], vec![1; 6]);
        assert_eq!(padded.boxes[0][0], [0; 4]);
        assert_eq!(padded.boxes[0][5], [SEP; 4]);
        assert_eq!(padded.mask[1], vec![0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_pad_boxes_truncates_coordinates() {
        let padded = pad_boxes(&[vec![[12.9, 0.4, 999.99, 1000.0]]], SEP, PAD);
        assert_eq!(padded.boxes[0], vec![[12, 0, 999, 1000], [SEP; 4]]);
    }

    #[test]
    fn test_pad_boxes_single_empty() {
        let padded = pad_boxes(&[vec![]], SEP, PAD);
        assert_eq!(padded.counts, vec![0]);
        assert_eq!(padded.boxes, vec![vec![[SEP; 4]]]);
        assert_eq!(padded.mask, vec![vec![1]]);
    }

    #[test]
    fn test_pad_boxes_empty_batch() {
        assert_eq!(pad_boxes(&[], SEP, PAD), PaddedBoxes::default());
    }
}
