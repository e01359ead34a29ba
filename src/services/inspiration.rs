use rand::seq::IndexedRandom;

use crate::core::models::{GenerationRequest, IllustrationStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorySample {
    pub characters: &'static str,
    pub setting: &'static str,
    pub plot: &'static str,
    pub illustration_style: IllustrationStyle,
}

impl StorySample {
    /// Overwrites the story idea and style; length, voice and images stay.
    pub fn apply_to(&self, request: &mut GenerationRequest) {
        request.characters = self.characters.to_string();
        request.setting = self.setting.to_string();
        request.plot = self.plot.to_string();
        request.illustration_style = self.illustration_style;
    }
}

pub const STORY_SAMPLES: [StorySample; 4] = [
    StorySample {
        characters: "A brave little knight who is afraid of the dark.",
        setting: "A medieval fantasy kingdom with a dark, enchanted forest.",
        plot: "The knight must venture into the Whispering Woods at night to find a magical glowing flower that can bring light back to his kingdom, which has been plunged into darkness by a grumpy wizard.",
        illustration_style: IllustrationStyle::ClassicStorybook,
    },
    StorySample {
        characters: "A curious robot named Bolt who can talk to animals.",
        setting: "A bustling, futuristic city park.",
        plot: "Bolt discovers a secret plan by a group of mischievous squirrels to steal all the nuts from the city park for their winter hoard. With his animal friends, Bolt must create a clever plan to outsmart the squirrels and ensure everyone has enough food for winter.",
        illustration_style: IllustrationStyle::Cartoon3d,
    },
    StorySample {
        characters: "A young witch named Willow who is still learning to control her magic.",
        setting: "A charming, magical town where everything is a little bit enchanted.",
        plot: "While trying to bake a magical birthday cake for her best friend, Willow accidentally mixes up a spell, causing all the desserts in the town to come to life. She must chase down and reverse the spell on dancing cupcakes and flying cookies before the birthday party starts.",
        illustration_style: IllustrationStyle::WhimsicalWatercolor,
    },
    StorySample {
        characters: "A shy octopus named Inky who loves to paint.",
        setting: "A vibrant coral reef teeming with sea life.",
        plot: "Inky wants to enter the annual underwater art contest, but is too shy to show his work. A friendly dolphin encourages him to create a masterpiece in secret. On the day of the contest, a strong current threatens to ruin all the art, and only Inky, with his eight arms, can save the day and reveal his talent.",
        illustration_style: IllustrationStyle::VibrantAnime,
    },
];

pub const WISHING_WELL_IDEAS: [&str; 10] = [
    "A brave knight who is afraid of the dark.",
    "A friendly dragon who can't breathe fire, but sneezes flowers instead.",
    "A squirrel who wants to collect moonbeams instead of acorns.",
    "A magical paintbrush that brings whatever it paints to life.",
    "Two best friends, a robot and a garden gnome, on a quest for the best pizza.",
    "A girl who discovers she can talk to cats, and they have a lot to say!",
    "A grumpy cloud that learns how to make rainbows.",
    "An underwater city populated by talking seahorses.",
    "A young wizard whose spells always have silly, unexpected results.",
    "A detective penguin who solves mysteries in the South Pole.",
];

pub fn random_sample() -> &'static StorySample {
    let mut rng = rand::rng();
    STORY_SAMPLES.choose(&mut rng).unwrap_or(&STORY_SAMPLES[0])
}

/// Picks an idea other than `previous`.
pub fn wishing_well_idea(previous: Option<&str>) -> &'static str {
    let candidates: Vec<&'static str> = WISHING_WELL_IDEAS
        .iter()
        .copied()
        .filter(|idea| Some(*idea) != previous)
        .collect();
    let mut rng = rand::rng();
    candidates
        .choose(&mut rng)
        .copied()
        .unwrap_or(WISHING_WELL_IDEAS[0])
}

/// A wishing well idea becomes the plot of a fresh request.
pub fn request_from_idea(idea: &str, base: GenerationRequest) -> GenerationRequest {
    GenerationRequest {
        plot: idea.to_string(),
        ..base
    }
}
