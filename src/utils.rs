use image::{ imageops, GrayImage };


// rows are laid out one after another, each `classes` wide.
// Classes with `allowed[i] == false` are never picked; a row with no allowed
// class yields `classes`.
pub fn argmax_in_axis0(input: &[f32], classes: usize, allowed: &[bool]) -> Vec<usize> {
    if classes == 0 {
        return Vec::new();
    }
    input.chunks(classes).map(|row| {
        let mut best: Option<(usize, f32)> = None;
        row.iter().enumerate().for_each(|(i, v)| {
            if !allowed.get(i).copied().unwrap_or(true) {
                return;
            }
            match best {
                Some((_, max)) if *v <= max => {}
                _ => best = Some((i, *v)),
            }
        });
        best.map(|(i, _)| i).unwrap_or(classes)
    }).collect()
}

/// Swap rows and columns.
pub fn transpose(input: &GrayImage) -> GrayImage {
    imageops::flip_horizontal(&imageops::rotate90(input))
}

/// Greedy CTC decoding of a `[steps, classes]` score matrix.
///
/// Any class index past the end of `charset` is the blank. Repeated indices on
/// consecutive steps collapse into one character. Returns the text and the mean
/// score of the emitted characters.
///
/// With an `allowlist`, every step picks its best allowed character or the
/// blank, so a disallowed top class gives way to the runner-up.
pub fn greedy_decode(scores: &[f32], classes: usize, charset: &[char], allowlist: Option<&str>) -> (String, f32) {
    let allowed: Vec<bool> = (0..classes)
        .map(|i| match (charset.get(i), allowlist) {
            (Some(c), Some(list)) => list.contains(*c),
            _ => true,
        })
        .collect();
    let argmax = argmax_in_axis0(scores, classes, &allowed);
    let mut text = String::new();
    let mut total = 0.0;
    let mut emitted = 0;
    let mut previous = None;
    for (step, &index) in argmax.iter().enumerate() {
        if index < charset.len() && index < classes && previous != Some(index) {
            text.push(charset[index]);
            total += scores[step * classes + index];
            emitted += 1;
        }
        previous = Some(index);
    }
    let confidence = if emitted == 0 { 0.0 } else { total / emitted as f32 };
    (text, confidence)
}
