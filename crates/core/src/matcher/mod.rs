use crate::{Chord, Note, Song, SongElement};

/// Exact structural comparison of two quantised songs.
///
/// Element order matters, order inside a chord does not. Timing offsets are
/// ignored; quantisation is expected to have aligned both sides already.
pub fn songs_match(a: &Song, b: &Song) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|pair| match pair {
            (SongElement::Note(x), SongElement::Note(y)) => notes_match(x, y),
            (SongElement::Chord(x), SongElement::Chord(y)) => chords_match(x, y),
            _ => false,
        })
}

pub fn notes_match(a: &Note, b: &Note) -> bool {
    a.pitch == b.pitch && a.length == b.length
}

pub fn chords_match(a: &Chord, b: &Chord) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let a = sorted_by_pitch(a);
    let b = sorted_by_pitch(b);
    a.iter().zip(&b).all(|(x, y)| notes_match(x, y))
}

fn sorted_by_pitch(chord: &Chord) -> Vec<&Note> {
    let mut notes: Vec<&Note> = chord.notes().iter().collect();
    notes.sort_by_cached_key(|note| note.pitch.as_ref().map(|pitch| pitch.sort_key()));
    notes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord(notes: &[(&str, &str)]) -> SongElement {
        Chord::new(
            notes
                .iter()
                .map(|(pitch, length)| Note::new(*pitch, length).unwrap())
                .collect(),
        )
        .unwrap()
        .into()
    }

    fn note(pitch: &str, length: &str) -> SongElement {
        Note::new(pitch, length).unwrap().into()
    }

    #[test]
    fn chord_order_does_not_matter() {
        let a = Song::new(vec![chord(&[("C4", "1/4"), ("E4", "1/4")])]);
        let b = Song::new(vec![chord(&[("E4", "1/4"), ("C4", "1/4")])]);
        assert!(songs_match(&a, &b));
    }

    #[test]
    fn element_order_matters() {
        let a = Song::new(vec![note("C4", "1/4"), note("E4", "1/4")]);
        let b = Song::new(vec![note("E4", "1/4"), note("C4", "1/4")]);
        assert!(!songs_match(&a, &b));
        assert!(songs_match(&a, &a.clone()));
    }

    #[test]
    fn shapes_and_sizes_must_agree() {
        let single = Song::new(vec![note("C4", "1/4")]);
        let as_chord = Song::new(vec![chord(&[("C4", "1/4")])]);
        assert!(!songs_match(&single, &as_chord));
        assert!(!songs_match(&single, &Song::default()));

        let triad = Song::new(vec![chord(&[("C4", "1/4"), ("E4", "1/4"), ("G4", "1/4")])]);
        let dyad = Song::new(vec![chord(&[("C4", "1/4"), ("E4", "1/4")])]);
        assert!(!songs_match(&triad, &dyad));
    }

    #[test]
    fn pitch_and_length_must_be_identical() {
        let quarter = Song::new(vec![note("C4", "1/4")]);
        assert!(!songs_match(&quarter, &Song::new(vec![note("C4", "1/8")])));
        assert!(!songs_match(&quarter, &Song::new(vec![note("C#4", "1/4")])));
        assert!(!songs_match(&quarter, &Song::new(vec![note("C4", "2/8")])));
    }

    #[test]
    fn offsets_are_ignored() {
        let plain = Song::new(vec![note("C4", "1/4"), note("D4", "1/4")]);
        let mut shifted = plain.clone();
        shifted.elements_mut()[1].set_offset_ms(Some(-10.0));
        assert!(songs_match(&plain, &shifted));
    }

    #[test]
    fn empty_songs_match() {
        assert!(songs_match(&Song::default(), &Song::default()));
    }
}
