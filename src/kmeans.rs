use crate::real;

/// Run K-means on the word vectors.
///
/// `data` holds one `dim`-length vector per word. Word `c` starts in class
/// `c % classes`. Each round recomputes the class centers, scales them to
/// unit length, and moves every word to the class whose center has the
/// largest dot product with it. Returns the class of each word.
pub fn kmeans(data: &[real], dim: usize, classes: usize, iterations: usize) -> Vec<usize> {
    assert!(dim > 0 && classes > 0);
    let num_words = data.len() / dim;
    let mut cl: Vec<usize> = (0..num_words).map(|a| a % classes).collect();
    let mut cent: Vec<real> = vec![0.0; classes * dim];
    let mut centcn = vec![0u64; classes];

    for _ in 0..iterations {
        cent.fill(0.0);
        centcn.fill(1);

        // cent[c] = sum of vectors in class c, centcn[c] = number of vectors in class c + 1
        for (c, v) in data.chunks_exact(dim).enumerate() {
            for (s, &x) in cent[cl[c] * dim..][..dim].iter_mut().zip(v) {
                *s += x;
            }
            centcn[cl[c]] += 1;
        }

        // cent[c] = center of class c, normalized to length 1
        for (center, &n) in cent.chunks_exact_mut(dim).zip(&centcn) {
            for x in center.iter_mut() {
                *x /= n as real;
            }
            let closev = center.iter().map(|x| x * x).sum::<real>().sqrt();
            if closev > 0.0 {
                for x in center.iter_mut() {
                    *x /= closev;
                }
            }
        }

        // Move vectors to nearest class (by dot-product similarity with center of class).
        for (c, v) in data.chunks_exact(dim).enumerate() {
            let mut closev: real = -10.0;
            let mut closeid = 0;
            for (d, center) in cent.chunks_exact(dim).enumerate() {
                let x = center.iter().zip(v).map(|(a, b)| a * b).sum::<real>();
                if x > closev {
                    closev = x;
                    closeid = d;
                }
            }
            cl[c] = closeid;
        }
    }
    cl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_two_directions() {
        #[rustfmt::skip]
        let data = [
            1.0, 0.1,
            0.0, 1.0,
            0.9, 0.0,
            0.1, 0.8,
            1.0, -0.1,
            -0.1, 1.0,
        ];
        let cl = kmeans(&data, 2, 2, 10);
        assert_eq!(cl.len(), 6);
        assert_eq!(cl[0], cl[2]);
        assert_eq!(cl[0], cl[4]);
        assert_eq!(cl[1], cl[3]);
        assert_eq!(cl[1], cl[5]);
        assert_ne!(cl[0], cl[1]);
    }

    #[test]
    fn zero_iterations_is_round_robin() {
        let data = [0.0; 10];
        assert_eq!(kmeans(&data, 2, 3, 0), [0, 1, 2, 0, 1]);
    }

    #[test]
    fn more_classes_than_words() {
        let data = [1.0, 0.0, 0.0, 1.0];
        let cl = kmeans(&data, 2, 5, 10);
        assert!(cl.iter().all(|&c| c < 5));
    }
}
