use crate::error::{SelectionKind, TileError, TileResult};

/// Channels and labels a batch iterator works on.
///
/// Both lists stay sorted and free of duplicates; they start out holding
/// everything the dataset offers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    available_channels: Vec<usize>,
    available_labels: Vec<u32>,
    channels: Vec<usize>,
    labels: Vec<u32>,
}

fn insert_sorted<T: Ord + Copy>(
    selected: &mut Vec<T>,
    available: &[T],
    value: T,
    kind: SelectionKind,
    id: u64,
) -> TileResult<bool> {
    let slot = match selected.binary_search(&value) {
        Ok(_) => {
            log::warn!("{kind} {id} already selected");
            return Ok(false);
        }
        Err(slot) => slot,
    };
    if !available.contains(&value) {
        return Err(TileError::NotInDataset { kind, value: id });
    }
    selected.insert(slot, value);
    Ok(true)
}

fn remove_sorted<T: Ord>(
    selected: &mut Vec<T>,
    value: T,
    kind: SelectionKind,
    id: u64,
) -> TileResult<()> {
    match selected.binary_search(&value) {
        Ok(slot) => {
            selected.remove(slot);
            Ok(())
        }
        Err(_) => Err(TileError::NotInSelection { kind, value: id }),
    }
}

fn checked_subset<T: Ord + Copy>(
    available: &[T],
    values: &[T],
    kind: SelectionKind,
    id: impl Fn(T) -> u64,
) -> TileResult<Vec<T>> {
    if let Some(&missing) = values.iter().find(|&&v| !available.contains(&v)) {
        return Err(TileError::NotInDataset {
            kind,
            value: id(missing),
        });
    }
    let mut subset = values.to_vec();
    subset.sort_unstable();
    subset.dedup();
    Ok(subset)
}

impl Selection {
    /// Select channels `0..channel_count` and all `labels`.
    pub fn new(channel_count: usize, labels: &[u32]) -> Self {
        let channels: Vec<usize> = (0..channel_count).collect();
        let mut labels = labels.to_vec();
        labels.sort_unstable();
        labels.dedup();
        Selection {
            available_channels: channels.clone(),
            available_labels: labels.clone(),
            channels,
            labels,
        }
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Returns `Ok(false)` if the channel was already selected.
    pub fn add_channel(&mut self, channel: usize) -> TileResult<bool> {
        insert_sorted(
            &mut self.channels,
            &self.available_channels,
            channel,
            SelectionKind::Channel,
            channel as u64,
        )
    }

    pub fn remove_channel(&mut self, channel: usize) -> TileResult<()> {
        remove_sorted(
            &mut self.channels,
            channel,
            SelectionKind::Channel,
            channel as u64,
        )
    }

    /// Returns `Ok(false)` if the label was already selected.
    pub fn add_label(&mut self, label: u32) -> TileResult<bool> {
        insert_sorted(
            &mut self.labels,
            &self.available_labels,
            label,
            SelectionKind::Label,
            label.into(),
        )
    }

    pub fn remove_label(&mut self, label: u32) -> TileResult<()> {
        remove_sorted(&mut self.labels, label, SelectionKind::Label, label.into())
    }

    /// Replace the channel selection; every channel has to be available.
    pub fn select_channels(&mut self, channels: &[usize]) -> TileResult<()> {
        self.channels = checked_subset(
            &self.available_channels,
            channels,
            SelectionKind::Channel,
            |c| c as u64,
        )?;
        Ok(())
    }

    /// Replace the label selection; every label has to be available.
    pub fn select_labels(&mut self, labels: &[u32]) -> TileResult<()> {
        self.labels = checked_subset(&self.available_labels, labels, SelectionKind::Label, u64::from)?;
        Ok(())
    }
}
