use std::collections::BTreeMap;

pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Fixed class index to name mapping owned by a model. Names are never blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: BTreeMap<usize, String>,
}

impl LabelTable {
    pub fn coco() -> Self {
        Self {
            names: COCO_CLASSES
                .iter()
                .enumerate()
                .map(|(i, n)| (i, n.to_string()))
                .collect(),
        }
    }

    /// Table indexed by position. Blank names are rejected.
    pub fn from_names<I, S>(names: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names
            .into_iter()
            .enumerate()
            .map(|(i, n)| checked_name(i, n.into()).map(|n| (i, n)))
            .collect::<anyhow::Result<BTreeMap<_, _>>>()?;

        if names.is_empty() {
            anyhow::bail!("label table has no classes");
        }
        Ok(Self { names })
    }

    /// Parse the `names` entry Ultralytics writes into exported model metadata,
    /// e.g. `{0: 'person', 1: 'bicycle'}`.
    pub fn from_ultralytics_metadata(raw: &str) -> anyhow::Result<Self> {
        let body = raw
            .trim()
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| anyhow::anyhow!("names metadata is not a dict: {raw}"))?;

        let mut names = BTreeMap::new();
        let mut rest = body.trim_start();

        while !rest.is_empty() {
            let colon = rest
                .find(':')
                .ok_or_else(|| anyhow::anyhow!("missing ':' in names metadata"))?;
            let index: usize = rest[..colon].trim().parse()?;
            rest = rest[colon + 1..].trim_start();

            let quote = rest
                .chars()
                .next()
                .filter(|c| *c == '\'' || *c == '"')
                .ok_or_else(|| anyhow::anyhow!("class {index} name is not quoted"))?;
            let end = rest[1..]
                .find(quote)
                .ok_or_else(|| anyhow::anyhow!("unterminated name for class {index}"))?;
            names.insert(index, checked_name(index, rest[1..1 + end].to_string())?);

            rest = rest[end + 2..].trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }

        if names.is_empty() {
            anyhow::bail!("names metadata has no classes");
        }

        Ok(Self { names })
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(&class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(|(i, n)| (*i, n.as_str()))
    }
}

fn checked_name(index: usize, name: String) -> anyhow::Result<String> {
    if name.trim().is_empty() {
        anyhow::bail!("class {index} has an empty name");
    }
    Ok(name)
}
