use crate::models::{AnalysisTask, Prompt};

const NUTRITION_PROMPT: &str = "You are an expert nutritionist. Analyze the food in the image.\n\
\n\
Format your response as a MARKDOWN TABLE with these columns:\n\
| Item | Estimated Calories | Carbs(g) | Fat(g) | Protein(g) |\n\
\n\
After the table, provide a short 1-sentence health verdict.";

pub fn nutrition_prompt() -> Prompt {
    Prompt::new(NUTRITION_PROMPT)
}

pub fn recipe_prompt(extra_ingredients: Option<&str>) -> Prompt {
    let combine_step = match extra_ingredients {
        Some(extra) => format!("2. Combine them with: {}.\n", extra),
        None => "2. Use only what you can see in the image.\n".to_string(),
    };

    Prompt::new(format!(
        "You are a Michelin-star chef.\n\
         1. Identify ingredients in the image.\n\
         {}\
         3. Suggest 2 gourmet recipes.\n\
         \n\
         Format as:\n\
         ### 🍲 [Recipe Name]\n\
         * **Time:** [Time]\n\
         * **Difficulty:** [Easy/Medium/Hard]\n\
         * **Instructions:** [Brief summary]",
        combine_step
    ))
}

pub fn prompt_for(task: &AnalysisTask) -> Prompt {
    match task {
        AnalysisTask::Nutrition => nutrition_prompt(),
        AnalysisTask::Recipes { extra_ingredients } => recipe_prompt(extra_ingredients.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nutrition_prompt_asks_for_table() {
        let prompt = prompt_for(&AnalysisTask::Nutrition);

        assert!(prompt
            .as_str()
            .contains("| Item | Estimated Calories | Carbs(g) | Fat(g) | Protein(g) |"));
        assert!(prompt.as_str().contains("1-sentence health verdict"));
    }

    #[test]
    fn test_recipe_prompt_includes_extras() {
        let prompt = prompt_for(&AnalysisTask::recipes(Some("spinach, butter".to_string())));

        assert!(prompt.as_str().contains("Combine them with: spinach, butter."));
        assert!(prompt.as_str().contains("### 🍲 [Recipe Name]"));
        assert!(prompt.as_str().contains("Suggest 2 gourmet recipes"));
    }

    #[test]
    fn test_recipe_prompt_without_extras() {
        let prompt = prompt_for(&AnalysisTask::recipes(None));

        assert!(!prompt.as_str().contains("Combine them with"));
        assert!(prompt.as_str().contains("2. Use only what you can see"));
    }
}
