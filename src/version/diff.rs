use crate::models::DiffLine;

/// 中间差异区超过该规模时不再计算最长公共子序列
const MAX_LCS_CELLS: usize = 4_000_000;

/// 按行比较两段文本
///
/// 先剥离公共前缀与后缀，只对中间变化的部分做 LCS。
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old_lines[prefix..]
        .iter()
        .rev()
        .zip(new_lines[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old_lines[prefix..old_lines.len() - suffix];
    let new_mid = &new_lines[prefix..new_lines.len() - suffix];

    let mut result: Vec<DiffLine> = old_lines[..prefix]
        .iter()
        .map(|l| DiffLine::Same((*l).to_string()))
        .collect();
    result.extend(diff_middle(old_mid, new_mid));
    result.extend(
        old_lines[old_lines.len() - suffix..]
            .iter()
            .map(|l| DiffLine::Same((*l).to_string())),
    );
    result
}

fn diff_middle(old: &[&str], new: &[&str]) -> Vec<DiffLine> {
    let (n, m) = (old.len(), new.len());
    if n.saturating_mul(m) > MAX_LCS_CELLS {
        log::warn!("Diff region too large ({} x {} lines), showing full replacement", n, m);
        let mut result: Vec<DiffLine> =
            old.iter().map(|l| DiffLine::Removed((*l).to_string())).collect();
        result.extend(new.iter().map(|l| DiffLine::Added((*l).to_string())));
        return result;
    }

    // lcs[i][j] = old[i..] 与 new[j..] 的最长公共子序列长度
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut result = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            result.push(DiffLine::Same(old[i].to_string()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            result.push(DiffLine::Removed(old[i].to_string()));
            i += 1;
        } else {
            result.push(DiffLine::Added(new[j].to_string()));
            j += 1;
        }
    }
    result.extend(old[i..].iter().map(|l| DiffLine::Removed((*l).to_string())));
    result.extend(new[j..].iter().map(|l| DiffLine::Added((*l).to_string())));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical() {
        let diff = diff_lines("a\nb\n", "a\nb\n");
        assert_eq!(diff, vec![DiffLine::Same("a".into()), DiffLine::Same("b".into())]);
    }

    #[test]
    fn test_insert_in_middle() {
        let diff = diff_lines("a\nb\nc", "a\nb\nx\nc");
        assert_eq!(
            diff,
            vec![
                DiffLine::Same("a".into()),
                DiffLine::Same("b".into()),
                DiffLine::Added("x".into()),
                DiffLine::Same("c".into()),
            ]
        );
    }

    #[test]
    fn test_replace_and_remove() {
        let diff = diff_lines("a\nb\nc\nd", "a\nB\nd");
        assert_eq!(
            diff,
            vec![
                DiffLine::Same("a".into()),
                DiffLine::Removed("b".into()),
                DiffLine::Removed("c".into()),
                DiffLine::Added("B".into()),
                DiffLine::Same("d".into()),
            ]
        );
    }

    #[test]
    fn test_shifted_lines_not_reported_as_changed() {
        // 插入一行后，后续行不应被视为全部修改
        let diff = diff_lines("r1\nr2\nr3\nr4", "r0\nr1\nr2\nr3\nr4");
        let changed = diff.iter().filter(|d| !matches!(d, DiffLine::Same(_))).count();
        assert_eq!(changed, 1);
    }
}
